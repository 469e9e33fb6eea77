//! blather server.
//!
//! Accepts clients over a well-known join FIFO, relays every message to all
//! of them, and keeps an activity log other processes can read.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod log;
pub mod opener;
pub mod registry;
pub mod runner;
pub mod server;

pub use config::ServerConfig;
pub use error::{RegistryError, ServerError};
pub use log::{ActivityLog, MessageLog, NoLog};
pub use opener::{ChannelOpener, FifoOpener, MemoryOpener};
pub use runner::{run_server, serve};
pub use server::Server;
