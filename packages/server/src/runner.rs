//! Server execution logic.

use std::{future::Future, sync::Arc};

use blather_shared::{signal::shutdown_signal, transport::DEFAULT_PERMS};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    config::ServerConfig,
    error::ServerError,
    log::{ActivityLog, MessageLog, NoLog},
    opener::FifoOpener,
    server::Server,
};

/// Run a server on named FIFOs until Ctrl+C or SIGTERM.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let log: Arc<dyn MessageLog> = if config.log_enabled {
        Arc::new(ActivityLog::create(&config.service, DEFAULT_PERMS)?)
    } else {
        tracing::info!("Activity log disabled");
        Arc::new(NoLog)
    };
    let opener = Arc::new(FifoOpener::new(DEFAULT_PERMS));
    let mut server = Server::start(config, opener, log)?;
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    let served = serve(&mut server, shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!("Event loop stopped: {}", e);
    }
    let shut_down = server.shutdown().await;
    served?;
    shut_down?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Drive the event loop until `shutdown` resolves.
///
/// Heartbeat ticks take priority over client input so a chatty client can't
/// starve liveness checks.
pub async fn serve<F>(server: &mut Server, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    let period = server.config().tick_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            _ = heartbeat.tick() => server.heartbeat().await?,
            ready = server.check_sources() => {
                ready?;
                server.dispatch().await?;
            }
        }
    }
}
