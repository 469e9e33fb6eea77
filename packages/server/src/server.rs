//! The server: one join channel, a registry of clients, and the dispatch
//! logic run on every wake-up of the event loop.

use std::{
    collections::VecDeque,
    future::poll_fn,
    path::{Path, PathBuf},
    sync::Arc,
    task::Poll,
};

use blather_shared::{
    protocol::{JOIN_LEN, JoinRequest, Message, MessageKind, ProtocolError, validate_name},
    transport::{RecordReader, TransportError, join_channel_path},
};
use tokio::task::JoinHandle;

use crate::{
    config::ServerConfig,
    error::{RegistryError, ServerError},
    log::MessageLog,
    opener::ChannelOpener,
    registry::{ClientId, NewClient, Registry},
};

pub struct Server {
    pub(crate) config: ServerConfig,
    join_path: PathBuf,
    join: Option<RecordReader>,
    join_ready: bool,
    pub(crate) registry: Registry,
    opener: Arc<dyn ChannelOpener>,
    pub(crate) log: Arc<dyn MessageLog>,
    pub(crate) time_sec: u64,
    pub(crate) who_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create the join channel and an empty registry.
    pub fn start(
        config: ServerConfig,
        opener: Arc<dyn ChannelOpener>,
        log: Arc<dyn MessageLog>,
    ) -> Result<Self, ServerError> {
        let join_path = join_channel_path(&config.service);
        let join = opener.create_join(&join_path)?;
        tracing::info!(
            "Server '{}' accepting joins on {}",
            config.service,
            join_path.display()
        );
        Ok(Self {
            registry: Registry::new(config.max_clients),
            config,
            join_path,
            join: Some(RecordReader::new(join, JOIN_LEN)),
            join_ready: false,
            opener,
            log,
            time_sec: 0,
            who_task: None,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn join_path(&self) -> &Path {
        &self.join_path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Current logical time in heartbeat ticks.
    pub fn time_sec(&self) -> u64 {
        self.time_sec
    }

    /// Wait until the join channel or any client's to-server channel holds a
    /// complete record, then record which ones do.
    ///
    /// Cancel-safe: bytes of a partially received record stay buffered.
    pub async fn check_sources(&mut self) -> Result<(), ServerError> {
        tracing::debug!(
            "Polling {} input sources",
            self.registry.len() + usize::from(self.join.is_some())
        );
        let join = &mut self.join;
        let registry = &mut self.registry;
        poll_fn(|cx| {
            let mut any_ready = false;
            if let Some(join) = join.as_mut() {
                match join.poll_record_ready(cx) {
                    Poll::Ready(Ok(())) => any_ready = true,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => {}
                }
            }
            for client in registry.iter_mut().filter(|client| !client.broken) {
                match client.to_server.poll_record_ready(cx) {
                    Poll::Ready(Ok(())) => {
                        client.data_ready = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        tracing::warn!("Channel of client '{}' failed: {}", client.name, e);
                        client.broken = true;
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }
            if any_ready {
                Poll::Ready(Ok::<(), TransportError>(()))
            } else {
                Poll::Pending
            }
        })
        .await?;

        self.join_ready = self.join.as_ref().is_some_and(RecordReader::is_ready);
        tracing::debug!("join_ready = {}", self.join_ready);
        for (index, client) in self.registry.iter().enumerate() {
            tracing::debug!(
                "client {} '{}' data_ready = {}",
                index,
                client.name,
                client.data_ready
            );
        }
        Ok(())
    }

    pub fn join_ready(&self) -> bool {
        self.join_ready
    }

    pub fn client_ready(&self, index: usize) -> Result<bool, RegistryError> {
        Ok(self.registry.get(index)?.data_ready)
    }

    /// Handle everything [`check_sources`](Self::check_sources) found ready:
    /// at most one join request, then one message per ready client in
    /// registry order.
    pub async fn dispatch(&mut self) -> Result<(), ServerError> {
        if self.join_ready {
            self.handle_join().await?;
        }

        let pending: Vec<ClientId> = self
            .registry
            .iter()
            .filter(|client| client.data_ready || client.broken)
            .map(|client| client.id)
            .collect();
        for id in pending {
            // Gone already if an earlier departure or eviction removed it.
            let Some(index) = self.registry.position(id) else {
                continue;
            };
            if self.registry.get(index)?.broken {
                self.disconnect_client(index).await?;
            } else {
                self.handle_client(index).await?;
            }
        }
        Ok(())
    }

    /// One pass of the event loop: wait, then dispatch.
    pub async fn step(&mut self) -> Result<(), ServerError> {
        self.check_sources().await?;
        self.dispatch().await
    }

    /// Read one join request and register its sender.
    pub async fn handle_join(&mut self) -> Result<(), ServerError> {
        self.join_ready = false;
        let Some(record) = self.join.as_mut().and_then(RecordReader::take_record) else {
            return Ok(());
        };
        let request = match JoinRequest::decode(&record).and_then(|request| {
            validate_name(&request.name)?;
            if request.to_client.is_empty() || request.to_server.is_empty() {
                return Err(ProtocolError::EmptyField { field: "channel" });
            }
            Ok(request)
        }) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Ignoring malformed join request: {}", e);
                return Ok(());
            }
        };
        tracing::info!("join request for new client '{}'", request.name);

        if let Some(index) = self.registry.position_by_name(&request.name) {
            tracing::info!(
                "Name '{}' already registered at index {}, replacing it",
                request.name,
                index
            );
            self.disconnect_client(index).await?;
        }

        match self.add_client(&request).await {
            Err(ServerError::Registry(RegistryError::CapacityExceeded(capacity))) => {
                tracing::warn!(
                    "Rejecting '{}': server is full ({} clients)",
                    request.name,
                    capacity
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Open the requester's channels, register it, and announce it.
    pub async fn add_client(&mut self, request: &JoinRequest) -> Result<(), ServerError> {
        if self.registry.is_full() {
            return Err(RegistryError::CapacityExceeded(self.registry.capacity()).into());
        }
        let to_client_path = PathBuf::from(&request.to_client);
        let to_server_path = PathBuf::from(&request.to_server);
        let to_client = self.opener.open_to_client(&to_client_path)?;
        let to_server = self.opener.open_to_server(&to_server_path)?;

        self.registry.add(NewClient {
            name: request.name.clone(),
            to_client_path,
            to_server_path,
            to_client,
            to_server,
            last_contact_time: self.time_sec,
        })?;
        tracing::info!(
            "Added '{}' to '{}' ({} clients)",
            request.name,
            self.config.service,
            self.registry.len()
        );
        self.broadcast(Message::joined(request.name.clone())).await
    }

    /// Remove the client at `index`, close its channels, and remove their
    /// endpoints.
    ///
    /// The registry is compacted before anything is closed, so an error here
    /// never leaves a half-removed entry behind.
    pub async fn remove_client(&mut self, index: usize) -> Result<(), ServerError> {
        let mut client = self.registry.remove(index)?;
        tracing::debug!("Removed client {} '{}'", index, client.name);
        let closed = client.close().await;
        drop(client.to_server);
        let released_client = self.opener.release(&client.to_client_path);
        let released_server = self.opener.release(&client.to_server_path);
        closed?;
        released_client?;
        released_server?;
        Ok(())
    }

    /// Read and act on one message from the client at `index`.
    pub async fn handle_client(&mut self, index: usize) -> Result<(), ServerError> {
        let time_sec = self.time_sec;
        let client = self.registry.get_mut(index)?;
        client.data_ready = false;
        client.last_contact_time = time_sec;
        let Some(record) = client.to_server.take_record() else {
            return Ok(());
        };
        let message = match Message::decode(&record) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring record from client '{}': {}", client.name, e);
                return Ok(());
            }
        };

        match message.kind {
            MessageKind::Departed => {
                tracing::info!("client {} '{}' DEPARTED", index, client.name);
                if let Err(e) = self.remove_client(index).await {
                    tracing::warn!("Failed to release departed client: {}", e);
                }
                self.broadcast(message).await
            }
            MessageKind::Mesg => {
                tracing::info!(
                    "client {} '{}' MESSAGE '{}'",
                    index,
                    client.name,
                    message.body
                );
                self.broadcast(message).await
            }
            MessageKind::Ping => {
                tracing::debug!("client {} '{}' PING", index, client.name);
                Ok(())
            }
            MessageKind::Joined | MessageKind::Disconnected | MessageKind::Shutdown => {
                tracing::debug!(
                    "Ignoring {:?} sent by client {} '{}'",
                    message.kind,
                    index,
                    client.name
                );
                Ok(())
            }
        }
    }

    /// Evict the client at `index` and announce the eviction to the rest.
    pub async fn disconnect_client(&mut self, index: usize) -> Result<(), ServerError> {
        let name = self.registry.get(index)?.name.clone();
        tracing::info!("client {} '{}' DISCONNECTED", index, name);
        if let Err(e) = self.remove_client(index).await {
            tracing::warn!("Failed to release disconnected client '{}': {}", name, e);
        }
        self.broadcast(Message::disconnected(name)).await
    }

    /// Write `message` to every registered client in registry order.
    ///
    /// Clients whose channel cannot be written are evicted after the fan-out,
    /// and one `DISCONNECTED` per eviction is broadcast in turn.
    pub async fn broadcast(&mut self, message: Message) -> Result<(), ServerError> {
        let mut queue = VecDeque::from([message]);
        while let Some(message) = queue.pop_front() {
            let record = message.encode()?;
            let mut failed = Vec::new();
            for (index, client) in self.registry.iter_mut().enumerate() {
                if let Err(e) = client.send(&record).await {
                    tracing::warn!("Failed to write to client {} '{}': {}", index, client.name, e);
                    failed.push(index);
                }
            }
            tracing::debug!(
                "Broadcast {:?} from '{}' to {} clients",
                message.kind,
                message.name,
                self.registry.len() - failed.len()
            );
            if message.kind.is_logged()
                && let Err(e) = self.log.append(&message)
            {
                tracing::warn!("Failed to log message: {}", e);
            }

            let mut evicted = Vec::with_capacity(failed.len());
            for index in failed.into_iter().rev() {
                let name = self.registry.get(index)?.name.clone();
                if let Err(e) = self.remove_client(index).await {
                    tracing::warn!("Failed to release client '{}': {}", name, e);
                }
                evicted.push(name);
            }
            queue.extend(evicted.into_iter().rev().map(Message::disconnected));
        }
        Ok(())
    }

    /// Stop accepting joins, tell every client, and release all resources.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        tracing::info!("Shutting down server '{}'", self.config.service);
        self.join = None;
        self.join_ready = false;
        if let Err(e) = self.opener.release(&self.join_path) {
            tracing::warn!("Failed to remove join channel: {}", e);
        }

        self.broadcast(Message::shutdown()).await?;
        while !self.registry.is_empty() {
            if let Err(e) = self.remove_client(0).await {
                tracing::warn!("Failed to release client during shutdown: {}", e);
            }
        }

        if let Some(task) = self.who_task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Snapshot writer failed: {}", e);
        }
        self.log.close()?;
        tracing::info!("Server '{}' shut down", self.config.service);
        Ok(())
    }
}
