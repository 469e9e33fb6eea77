//! On-disk layout of the activity log.
//!
//! ```text
//! offset 0            WHO_LEN                     WHO_LEN + k * MESSAGE_LEN
//! | WhoSnapshot       | Message 0 | Message 1 | ... | Message k |
//! ```
//!
//! The snapshot header is rewritten in place; messages are only ever
//! appended. Writers and readers of the header hold the log's named
//! semaphore, appends need no lock because the server is the single writer.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::{FileExt, OpenOptionsExt},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::{
    protocol::{
        MAX_CLIENTS, MESSAGE_LEN, Message, NAME_LEN, ProtocolError, check_len, get_field,
        put_field,
    },
    semaphore::NamedSemaphore,
};

/// Encoded size of a [`WhoSnapshot`].
pub const WHO_LEN: usize = 4 + MAX_CLIENTS * NAME_LEN;

/// Activity log errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("log semaphore error: {0}")]
    Semaphore(#[source] io::Error),

    #[error("malformed log record: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Path of a server's activity log.
pub fn log_path(service: &str) -> PathBuf {
    PathBuf::from(format!("{service}.log"))
}

/// Name of the semaphore guarding a server's snapshot header.
///
/// Semaphore names may not contain slashes past the leading one, so only the
/// last path component of the service is used.
pub fn semaphore_name(service: &str) -> String {
    let base = Path::new(service)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| service.replace('/', "_"));
    format!("/{base}.sem")
}

/// Names of the connected clients at some recent point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhoSnapshot {
    pub names: Vec<String>,
}

impl WhoSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Encode into a [`WHO_LEN`]-byte header. Names past [`MAX_CLIENTS`] are dropped.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let count = self.names.len().min(MAX_CLIENTS);
        let mut buf = BytesMut::with_capacity(WHO_LEN);
        buf.put_i32_le(count as i32);
        for name in &self.names[..count] {
            put_field(&mut buf, "name", name, NAME_LEN)?;
        }
        buf.put_bytes(0, (MAX_CLIENTS - count) * NAME_LEN);
        Ok(buf)
    }

    pub fn decode(record: &[u8]) -> Result<Self, ProtocolError> {
        check_len(record, WHO_LEN)?;
        let mut buf = record;
        let count = buf.get_i32_le().clamp(0, MAX_CLIENTS as i32) as usize;
        let names = (0..count)
            .map(|_| get_field(&mut buf, "name", NAME_LEN))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names })
    }
}

/// Raw access to the log file: header at offset 0, records after it.
pub struct LogFile {
    file: File,
    end: AtomicU64,
}

impl LogFile {
    /// Create or truncate the log and write an empty snapshot header.
    pub fn create(path: &Path, perms: u32) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(perms)
            .open(path)?;
        file.write_all_at(&WhoSnapshot::default().encode()?, 0)?;
        Ok(Self {
            file,
            end: AtomicU64::new(WHO_LEN as u64),
        })
    }

    /// Open an existing log read-only.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            end: AtomicU64::new(len),
        })
    }

    /// Append one message at the end of the log.
    pub fn append(&self, message: &Message) -> Result<(), LogError> {
        let record = message.encode()?;
        let offset = self.end.fetch_add(MESSAGE_LEN as u64, Ordering::SeqCst);
        self.file.write_all_at(&record, offset)?;
        Ok(())
    }

    /// Overwrite the snapshot header. Callers hold the log semaphore.
    pub fn write_who(&self, who: &WhoSnapshot) -> Result<(), LogError> {
        self.file.write_all_at(&who.encode()?, 0)?;
        Ok(())
    }

    /// Read the snapshot header. Callers hold the log semaphore.
    pub fn read_who(&self) -> Result<WhoSnapshot, LogError> {
        let mut buf = vec![0; WHO_LEN];
        self.file.read_exact_at(&mut buf, 0)?;
        Ok(WhoSnapshot::decode(&buf)?)
    }

    /// Number of complete message records in the log.
    pub fn message_count(&self) -> Result<u64, LogError> {
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(WHO_LEN as u64) / MESSAGE_LEN as u64)
    }

    /// The most recent `n` messages, oldest first.
    ///
    /// Fewer are returned when the log holds fewer; records with an unknown
    /// kind are skipped.
    pub fn last(&self, n: usize) -> Result<Vec<Message>, LogError> {
        let count = self.message_count()?;
        let n = (n as u64).min(count);
        let mut offset = WHO_LEN as u64 + (count - n) * MESSAGE_LEN as u64;
        let mut buf = vec![0; MESSAGE_LEN];
        let mut messages = Vec::with_capacity(n as usize);
        for _ in 0..n {
            self.file.read_exact_at(&mut buf, offset)?;
            offset += MESSAGE_LEN as u64;
            match Message::decode(&buf) {
                Ok(message) => messages.push(message),
                Err(ProtocolError::UnknownKind(code)) => {
                    tracing::warn!("Skipping log record with unknown kind {}", code);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(messages)
    }
}

/// Client-side, read-only view of a server's activity log.
pub struct LogReader {
    file: LogFile,
    lock: NamedSemaphore,
}

impl LogReader {
    /// Open the log and semaphore of `service`.
    pub fn open(service: &str) -> Result<Self, LogError> {
        let file = LogFile::open(&log_path(service))?;
        let lock = NamedSemaphore::open(&semaphore_name(service)).map_err(LogError::Semaphore)?;
        Ok(Self { file, lock })
    }

    /// Current membership snapshot, read under the log semaphore.
    pub fn who(&self) -> Result<WhoSnapshot, LogError> {
        let _guard = self.lock.acquire().map_err(LogError::Semaphore)?;
        self.file.read_who()
    }

    /// The most recent `n` logged messages, oldest first.
    pub fn last(&self, n: usize) -> Result<Vec<Message>, LogError> {
        self.file.last(n)
    }
}
