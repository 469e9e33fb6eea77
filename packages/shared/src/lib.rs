//! Shared building blocks for the blather chat server and client.
//!
//! Blather relays text between clients over named FIFOs: one well-known join
//! channel per server and a private channel pair per client. This crate holds
//! the pieces both sides agree on: the record formats, the channel transport,
//! and the activity log layout.

pub mod activity_log;
pub mod logger;
pub mod protocol;
pub mod semaphore;
pub mod signal;
pub mod transport;
