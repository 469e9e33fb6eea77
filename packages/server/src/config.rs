//! Server configuration.

use std::time::Duration;

use blather_shared::protocol::MAX_CLIENTS;

/// Seconds between heartbeat ticks.
pub const DEFAULT_TICK_SECS: u64 = 1;
/// Ticks without contact after which a client is evicted.
pub const DEFAULT_DISCONNECT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Service name; the join channel and log are named after it
    pub service: String,
    /// Registry capacity, at most [`MAX_CLIENTS`]
    pub max_clients: usize,
    /// Interval between heartbeat ticks
    pub tick_interval: Duration,
    /// Logical seconds of silence that get a client disconnected
    pub disconnect_secs: u64,
    /// Whether the activity log is maintained
    pub log_enabled: bool,
}

impl ServerConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            max_clients: MAX_CLIENTS,
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECS),
            disconnect_secs: DEFAULT_DISCONNECT_SECS,
            log_enabled: true,
        }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.min(MAX_CLIENTS);
        self
    }
}
