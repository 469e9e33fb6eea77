//! Named FIFO channels and fixed-size record framing.
//!
//! A channel is any byte stream. On a real deployment each channel is a
//! named FIFO opened read/write, so an open channel never reports
//! end-of-file just because no peer currently has it open. Tests substitute
//! in-memory streams through the same boxed reader/writer types.

use std::{
    ffi::CString,
    fmt::Display,
    future::poll_fn,
    io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::unix::pipe,
};

/// Permissions used when creating channel endpoints.
pub const DEFAULT_PERMS: u32 = 0o600;

/// Inbound half of a channel.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;
/// Outbound half of a channel.
pub type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Channel transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create channel '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open channel '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove channel '{}': {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer end of the channel went away
    #[error("channel closed by peer")]
    Closed,
}

/// Path of a server's well-known join channel.
pub fn join_channel_path(service: &str) -> PathBuf {
    PathBuf::from(format!("{service}.fifo"))
}

/// Paths of one client's private channel pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChannelPaths {
    /// Server writes, client reads
    pub to_client: PathBuf,
    /// Client writes, server reads
    pub to_server: PathBuf,
}

impl ClientChannelPaths {
    /// Derive both channel paths from a per-client identifier such as a pid.
    pub fn for_id(id: impl Display) -> Self {
        Self {
            to_client: PathBuf::from(format!("{id}.client.fifo")),
            to_server: PathBuf::from(format!("{id}.server.fifo")),
        }
    }
}

/// Create a FIFO at `path`, replacing whatever file was there.
pub fn create_fifo(path: &Path, mode: u32) -> Result<(), TransportError> {
    remove_endpoint(path)?;
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| TransportError::Create {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc == -1 {
        return Err(TransportError::Create {
            path: path.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }
    tracing::debug!("Created channel {}", path.display());
    Ok(())
}

/// Remove a channel endpoint file. A missing file is not an error.
pub fn remove_endpoint(path: &Path) -> Result<(), TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TransportError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Open an existing FIFO for reading. Must run inside a tokio runtime.
pub fn open_fifo_reader(path: &Path) -> Result<BoxReader, TransportError> {
    let receiver = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Box::pin(receiver))
}

/// Open an existing FIFO for writing. Must run inside a tokio runtime.
pub fn open_fifo_writer(path: &Path) -> Result<BoxWriter, TransportError> {
    let sender = pipe::OpenOptions::new()
        .read_write(true)
        .open_sender(path)
        .map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Box::pin(sender))
}

/// Write one whole record and flush it.
pub async fn write_record(writer: &mut BoxWriter, record: &[u8]) -> Result<(), TransportError> {
    writer.write_all(record).await?;
    writer.flush().await?;
    Ok(())
}

/// Accumulates bytes from a channel until one fixed-size record is complete.
///
/// Readiness means "a whole record is buffered", so polling is cancel-safe:
/// a partially received record stays in the buffer across wake-ups.
pub struct RecordReader {
    inner: BoxReader,
    buf: Vec<u8>,
    filled: usize,
}

impl RecordReader {
    pub fn new(inner: BoxReader, record_len: usize) -> Self {
        Self {
            inner,
            buf: vec![0; record_len],
            filled: 0,
        }
    }

    /// Whether a complete record is waiting to be taken.
    pub fn is_ready(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// Drive the underlying channel until a complete record is buffered.
    pub fn poll_record_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), TransportError>> {
        while !self.is_ready() {
            let mut read_buf = ReadBuf::new(&mut self.buf[self.filled..]);
            ready!(self.inner.as_mut().poll_read(cx, &mut read_buf))?;
            let n = read_buf.filled().len();
            if n == 0 {
                return Poll::Ready(Err(TransportError::Closed));
            }
            self.filled += n;
        }
        Poll::Ready(Ok(()))
    }

    /// Take the buffered record, if complete, and start a new one.
    pub fn take_record(&mut self) -> Option<Bytes> {
        if !self.is_ready() {
            return None;
        }
        self.filled = 0;
        Some(Bytes::copy_from_slice(&self.buf))
    }

    /// Wait for and return the next record.
    pub async fn next_record(&mut self) -> Result<Bytes, TransportError> {
        loop {
            poll_fn(|cx| self.poll_record_ready(cx)).await?;
            if let Some(record) = self.take_record() {
                return Ok(record);
            }
        }
    }
}
