//! Bounded, ordered collection of connected clients.
//!
//! Removal compacts the sequence while preserving the relative order of the
//! survivors. Each record also carries a [`ClientId`] that never changes, so
//! callers holding ids across removals can re-resolve the current index.

use std::path::PathBuf;

use blather_shared::{
    protocol::{MAX_CLIENTS, MESSAGE_LEN},
    transport::{BoxReader, BoxWriter, RecordReader, TransportError, write_record},
};
use tokio::io::AsyncWriteExt;

use crate::error::RegistryError;

/// Stable identity of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Everything needed to register a client whose channels are already open.
pub struct NewClient {
    pub name: String,
    pub to_client_path: PathBuf,
    pub to_server_path: PathBuf,
    pub to_client: BoxWriter,
    pub to_server: BoxReader,
    pub last_contact_time: u64,
}

/// A connected client.
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub to_client_path: PathBuf,
    pub to_server_path: PathBuf,
    /// Server logical time of the last record received from this client
    pub last_contact_time: u64,
    /// A complete record is waiting on the to-server channel
    pub data_ready: bool,
    /// The to-server channel failed; the client is due for eviction
    pub broken: bool,
    pub(crate) to_client: BoxWriter,
    pub(crate) to_server: RecordReader,
}

impl ClientRecord {
    /// Write one encoded record to this client's to-client channel.
    pub async fn send(&mut self, record: &[u8]) -> Result<(), TransportError> {
        write_record(&mut self.to_client, record).await
    }

    /// Close the to-client channel.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.to_client.shutdown().await?;
        Ok(())
    }
}

pub struct Registry {
    clients: Vec<ClientRecord>,
    capacity: usize,
    next_id: u64,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CLIENTS);
        Self {
            clients: Vec::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.capacity
    }

    /// Append a client. A full registry is left untouched.
    pub fn add(&mut self, client: NewClient) -> Result<ClientId, RegistryError> {
        if self.is_full() {
            return Err(RegistryError::CapacityExceeded(self.capacity));
        }
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.clients.push(ClientRecord {
            id,
            name: client.name,
            to_client_path: client.to_client_path,
            to_server_path: client.to_server_path,
            last_contact_time: client.last_contact_time,
            data_ready: false,
            broken: false,
            to_client: client.to_client,
            to_server: RecordReader::new(client.to_server, MESSAGE_LEN),
        });
        Ok(id)
    }

    /// Remove the client at `index`, shifting later clients down by one.
    pub fn remove(&mut self, index: usize) -> Result<ClientRecord, RegistryError> {
        self.check_index(index)?;
        Ok(self.clients.remove(index))
    }

    pub fn get(&self, index: usize) -> Result<&ClientRecord, RegistryError> {
        self.check_index(index)?;
        Ok(&self.clients[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut ClientRecord, RegistryError> {
        self.check_index(index)?;
        Ok(&mut self.clients[index])
    }

    /// Current index of the client registered as `id`.
    pub fn position(&self, id: ClientId) -> Option<usize> {
        self.clients.iter().position(|client| client.id == id)
    }

    /// Current index of the client registered under `name`.
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.clients.iter().position(|client| client.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientRecord> {
        self.clients.iter_mut()
    }

    /// Names in registry order.
    pub fn names(&self) -> Vec<String> {
        self.clients.iter().map(|client| client.name.clone()).collect()
    }

    fn check_index(&self, index: usize) -> Result<(), RegistryError> {
        if index >= self.clients.len() {
            return Err(RegistryError::IndexOutOfRange {
                index,
                len: self.clients.len(),
            });
        }
        Ok(())
    }
}
