//! blather client.
//!
//! Joins a server through its join FIFO, sends what the user types, and shows
//! what everyone else says.

pub mod config;
pub mod display;
pub mod domain;
pub mod error;
pub mod formatter;
pub mod runner;
pub mod session;

pub use config::ClientConfig;
pub use error::ClientError;
pub use runner::run_client;
