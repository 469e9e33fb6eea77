//! Periodic liveness work: logical clock, pings, eviction of silent clients,
//! and the membership snapshot in the activity log.

use std::sync::Arc;

use blather_shared::{activity_log::WhoSnapshot, protocol::Message};

use crate::{error::ServerError, registry::ClientId, server::Server};

impl Server {
    /// Advance the logical clock by one second.
    pub fn tick(&mut self) {
        self.time_sec += 1;
        tracing::debug!("tick {}", self.time_sec);
    }

    /// Send a `PING` to every client.
    pub async fn ping_clients(&mut self) -> Result<(), ServerError> {
        let ping = Message::ping(self.config.service.clone());
        self.broadcast(ping).await
    }

    /// Disconnect every client that has been silent for at least `secs`
    /// logical seconds.
    pub async fn remove_disconnected(&mut self, secs: u64) -> Result<(), ServerError> {
        let time_sec = self.time_sec;
        let stale: Vec<ClientId> = self
            .registry
            .iter()
            .filter(|client| time_sec.saturating_sub(client.last_contact_time) >= secs)
            .map(|client| client.id)
            .collect();
        for id in stale {
            let Some(index) = self.registry.position(id) else {
                continue;
            };
            tracing::info!(
                "client '{}' silent since {}, now {}",
                self.registry.get(index)?.name,
                self.registry.get(index)?.last_contact_time,
                time_sec
            );
            self.disconnect_client(index).await?;
        }
        Ok(())
    }

    /// Write the current membership to the activity log header in the
    /// background. Skipped while the previous write is still running.
    pub fn write_who(&mut self) {
        if self
            .who_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            tracing::debug!("Previous snapshot write still running, skipping");
            return;
        }
        let who = WhoSnapshot::new(self.registry.names());
        let log = Arc::clone(&self.log);
        self.who_task = Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = log.write_who(&who) {
                tracing::warn!("Failed to write who snapshot: {}", e);
            }
        }));
    }

    /// Everything done once per heartbeat interval.
    pub async fn heartbeat(&mut self) -> Result<(), ServerError> {
        self.tick();
        self.ping_clients().await?;
        self.remove_disconnected(self.config.disconnect_secs).await?;
        self.write_who();
        Ok(())
    }
}
