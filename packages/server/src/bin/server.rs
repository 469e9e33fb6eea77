//! blather chat server.
//!
//! Creates `<service>.fifo` for join requests and broadcasts every message it
//! receives to all connected clients.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin blather-server -- lobby
//! cargo run --bin blather-server -- lobby --disconnect-secs 10 --no-log
//! ```

use std::time::Duration;

use blather_server::{ServerConfig, config, run_server};
use blather_shared::{logger::setup_logger, protocol::MAX_CLIENTS};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "blather-server")]
#[command(about = "FIFO chat server with broadcast support", long_about = None)]
struct Args {
    /// Service name; clients join through `<service>.fifo`
    service: String,

    /// Seconds between heartbeat ticks
    #[arg(long, default_value_t = config::DEFAULT_TICK_SECS)]
    tick_secs: u64,

    /// Ticks without contact before a client is disconnected
    #[arg(long, default_value_t = config::DEFAULT_DISCONNECT_SECS)]
    disconnect_secs: u64,

    /// Maximum number of connected clients
    #[arg(long, default_value_t = MAX_CLIENTS as u16,
          value_parser = clap::value_parser!(u16).range(1..=MAX_CLIENTS as i64))]
    max_clients: u16,

    /// Don't maintain `<service>.log`
    #[arg(long)]
    no_log: bool,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let mut config =
        ServerConfig::new(args.service).with_max_clients(usize::from(args.max_clients));
    config.tick_interval = Duration::from_secs(args.tick_secs.max(1));
    config.disconnect_secs = args.disconnect_secs;
    config.log_enabled = !args.no_log;

    if let Err(e) = run_server(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
