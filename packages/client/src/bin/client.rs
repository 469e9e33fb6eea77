//! blather chat client.
//!
//! Joins the server `<service>` under a display name. Each line typed is sent
//! to everyone; Ctrl+D leaves the chat. With `--advanced` (or `BL_ADVANCED`
//! set), `%who` lists connected clients and `%last N` shows recent messages.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin blather-client -- lobby alice
//! BL_ADVANCED=1 cargo run --bin blather-client -- lobby bob
//! ```

use blather_client::{ClientConfig, run_client};
use blather_shared::logger::setup_logger;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "blather-client")]
#[command(about = "FIFO chat client", long_about = None)]
struct Args {
    /// Service name of the server to join
    service: String,

    /// Display name
    name: String,

    /// Enable %who and %last N
    #[arg(long)]
    advanced: bool,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();

    let mut config = ClientConfig::new(args.service, args.name);
    config.advanced = args.advanced || std::env::var_os("BL_ADVANCED").is_some();

    if let Err(e) = run_client(config).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
