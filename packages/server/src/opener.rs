//! How the server obtains its channels.
//!
//! `FifoOpener` works on named FIFOs in the filesystem. `MemoryOpener` hands
//! out in-process streams registered ahead of time, which lets the whole
//! server run without touching the filesystem.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use blather_shared::transport::{
    BoxReader, BoxWriter, TransportError, create_fifo, open_fifo_reader, open_fifo_writer,
    remove_endpoint,
};
use tokio::io::{DuplexStream, duplex};

/// Opens and releases the channels the server talks over.
pub trait ChannelOpener: Send + Sync {
    /// Create the well-known join channel and open it for reading.
    fn create_join(&self, path: &Path) -> Result<BoxReader, TransportError>;

    /// Open a client's to-client channel for writing.
    fn open_to_client(&self, path: &Path) -> Result<BoxWriter, TransportError>;

    /// Open a client's to-server channel for reading.
    fn open_to_server(&self, path: &Path) -> Result<BoxReader, TransportError>;

    /// Remove a channel endpoint once nobody should open it again.
    fn release(&self, path: &Path) -> Result<(), TransportError>;
}

/// Channels backed by named FIFOs.
#[derive(Debug, Clone, Copy)]
pub struct FifoOpener {
    perms: u32,
}

impl FifoOpener {
    pub fn new(perms: u32) -> Self {
        Self { perms }
    }
}

impl ChannelOpener for FifoOpener {
    fn create_join(&self, path: &Path) -> Result<BoxReader, TransportError> {
        create_fifo(path, self.perms)?;
        open_fifo_reader(path)
    }

    fn open_to_client(&self, path: &Path) -> Result<BoxWriter, TransportError> {
        open_fifo_writer(path)
    }

    fn open_to_server(&self, path: &Path) -> Result<BoxReader, TransportError> {
        open_fifo_reader(path)
    }

    fn release(&self, path: &Path) -> Result<(), TransportError> {
        remove_endpoint(path)
    }
}

enum Endpoint {
    Reader(BoxReader),
    Writer(BoxWriter),
}

/// Channels backed by in-memory duplex streams.
///
/// Each registered path can be opened once; the caller keeps the far end of
/// the stream and plays the client's side of it.
#[derive(Default)]
pub struct MemoryOpener {
    endpoints: Mutex<HashMap<PathBuf, Endpoint>>,
    released: Mutex<Vec<PathBuf>>,
}

const MEMORY_CHANNEL_CAPACITY: usize = 64 * 1024;

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel the server reads from. Returns the writing end.
    pub fn register_inbound(&self, path: impl Into<PathBuf>) -> DuplexStream {
        let (server_end, far_end) = duplex(MEMORY_CHANNEL_CAPACITY);
        self.insert(path.into(), Endpoint::Reader(Box::pin(server_end)));
        far_end
    }

    /// Register a channel the server writes to. Returns the reading end.
    pub fn register_outbound(&self, path: impl Into<PathBuf>) -> DuplexStream {
        let (server_end, far_end) = duplex(MEMORY_CHANNEL_CAPACITY);
        self.insert(path.into(), Endpoint::Writer(Box::pin(server_end)));
        far_end
    }

    /// Paths released so far, in release order.
    pub fn released(&self) -> Vec<PathBuf> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn insert(&self, path: PathBuf, endpoint: Endpoint) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, endpoint);
    }

    fn take(&self, path: &Path) -> Option<Endpoint> {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    fn open_reader(&self, path: &Path) -> Result<BoxReader, TransportError> {
        match self.take(path) {
            Some(Endpoint::Reader(reader)) => Ok(reader),
            _ => Err(not_found(path)),
        }
    }
}

impl ChannelOpener for MemoryOpener {
    fn create_join(&self, path: &Path) -> Result<BoxReader, TransportError> {
        self.open_reader(path)
    }

    fn open_to_client(&self, path: &Path) -> Result<BoxWriter, TransportError> {
        match self.take(path) {
            Some(Endpoint::Writer(writer)) => Ok(writer),
            _ => Err(not_found(path)),
        }
    }

    fn open_to_server(&self, path: &Path) -> Result<BoxReader, TransportError> {
        self.open_reader(path)
    }

    fn release(&self, path: &Path) -> Result<(), TransportError> {
        self.take(path);
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
        Ok(())
    }
}

fn not_found(path: &Path) -> TransportError {
    TransportError::Open {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "no such channel"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_opener_opens_each_channel_once() {
        // テスト項目: 登録したチャンネルは 1 度だけ開ける
        // given (前提条件):
        let opener = MemoryOpener::new();
        let _far = opener.register_inbound("7.server.fifo");

        // when (操作):
        let first = opener.open_to_server(Path::new("7.server.fifo"));
        let second = opener.open_to_server(Path::new("7.server.fifo"));

        // then (期待する結果):
        assert!(first.is_ok());
        assert!(matches!(second, Err(TransportError::Open { .. })));
    }

    #[test]
    fn test_memory_opener_rejects_wrong_direction() {
        // テスト項目: 書き込み用に登録したチャンネルは読み込み用に開けない
        // given (前提条件):
        let opener = MemoryOpener::new();
        let _far = opener.register_outbound("7.client.fifo");

        // when (操作):
        let result = opener.open_to_server(Path::new("7.client.fifo"));

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_opener_records_releases() {
        // テスト項目: 解放したパスが順番に記録される
        // given (前提条件):
        let opener = MemoryOpener::new();

        // when (操作):
        opener.release(Path::new("a.fifo")).unwrap();
        opener.release(Path::new("b.fifo")).unwrap();

        // then (期待する結果):
        assert_eq!(
            opener.released(),
            vec![PathBuf::from("a.fifo"), PathBuf::from("b.fifo")]
        );
    }
}
