//! Error types for the blather server.

use blather_shared::{activity_log::LogError, protocol::ProtocolError, transport::TransportError};
use thiserror::Error;

/// Client registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No room for another client; the join is rejected
    #[error("registry is full ({0} clients)")]
    CapacityExceeded(usize),

    /// Access past the end of the registry
    #[error("client index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
