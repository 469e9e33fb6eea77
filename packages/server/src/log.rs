//! Server side of the activity log.

use std::path::PathBuf;

use blather_shared::{
    activity_log::{LogError, LogFile, WhoSnapshot, log_path, semaphore_name},
    protocol::Message,
    semaphore::NamedSemaphore,
};

/// Where the server records delivered messages and membership snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait MessageLog: Send + Sync {
    /// Append a delivered message.
    fn append(&self, message: &Message) -> Result<(), LogError>;

    /// Rewrite the membership snapshot. May block on the snapshot lock.
    fn write_who(&self, who: &WhoSnapshot) -> Result<(), LogError>;

    /// Release shared resources at shutdown.
    fn close(&self) -> Result<(), LogError>;
}

/// Log file `<service>.log` guarded by semaphore `/<service>.sem`.
pub struct ActivityLog {
    path: PathBuf,
    file: LogFile,
    lock: NamedSemaphore,
}

impl ActivityLog {
    pub fn create(service: &str, perms: u32) -> Result<Self, LogError> {
        let path = log_path(service);
        let file = LogFile::create(&path, perms)?;
        let lock =
            NamedSemaphore::create(&semaphore_name(service), perms).map_err(LogError::Semaphore)?;
        tracing::info!(
            "Activity log at {} guarded by {}",
            path.display(),
            lock.name()
        );
        Ok(Self { path, file, lock })
    }
}

impl MessageLog for ActivityLog {
    fn append(&self, message: &Message) -> Result<(), LogError> {
        self.file.append(message)
    }

    fn write_who(&self, who: &WhoSnapshot) -> Result<(), LogError> {
        let _guard = self.lock.acquire().map_err(LogError::Semaphore)?;
        self.file.write_who(who)
    }

    fn close(&self) -> Result<(), LogError> {
        tracing::debug!("Closing activity log {}", self.path.display());
        NamedSemaphore::unlink(self.lock.name()).map_err(LogError::Semaphore)
    }
}

/// Used when the activity log is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLog;

impl MessageLog for NoLog {
    fn append(&self, _message: &Message) -> Result<(), LogError> {
        Ok(())
    }

    fn write_who(&self, _who: &WhoSnapshot) -> Result<(), LogError> {
        Ok(())
    }

    fn close(&self) -> Result<(), LogError> {
        Ok(())
    }
}
