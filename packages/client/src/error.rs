//! Error types for the blather client.

use std::path::PathBuf;

use blather_shared::{activity_log::LogError, protocol::ProtocolError, transport::TransportError};
use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The join channel does not exist
    #[error("server is not running: {} not found", .0.display())]
    ServerNotRunning(PathBuf),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The line editor could not be started
    #[error("line editor error: {0}")]
    Readline(String),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
