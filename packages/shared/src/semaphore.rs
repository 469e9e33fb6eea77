//! Process-shared binary semaphore backed by a POSIX named semaphore.

use std::{ffi::CString, io};

/// A named semaphore usable as a mutex between processes.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// POSIX semaphores may be used concurrently from any thread.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a fresh semaphore with value 1, replacing a stale one.
    pub fn create(name: &str, perms: u32) -> io::Result<Self> {
        Self::unlink(name)?;
        let c_name = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        Self::checked(sem, name)
    }

    /// Open a semaphore some other process created.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = c_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::checked(sem, name)
    }

    fn checked(sem: *mut libc::sem_t, name: &str) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the semaphore is held. Released when the guard drops.
    pub fn acquire(&self) -> io::Result<SemaphoreGuard<'_>> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(SemaphoreGuard { sem: self });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    fn release(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Remove the name from the system. A missing name is not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = c_name(name)?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}

/// Holds a [`NamedSemaphore`] until dropped.
pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.release() {
            tracing::warn!("Failed to release semaphore '{}': {}", self.sem.name, e);
        }
    }
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("/blather_{prefix}_{}_{n}", std::process::id())
    }

    #[test]
    fn test_acquire_and_release() {
        // テスト項目: 取得したセマフォはガードの破棄で解放され、再取得できる
        // given (前提条件):
        let name = unique_name("acquire");
        let sem = NamedSemaphore::create(&name, 0o600).unwrap();

        // when (操作):
        let first = sem.acquire().map(drop);
        let second = sem.acquire().map(drop);

        // then (期待する結果):
        assert!(first.is_ok());
        assert!(second.is_ok());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_existing_shares_state() {
        // テスト項目: 既存のセマフォを別ハンドルで開くと同じ状態を共有する
        // given (前提条件):
        let name = unique_name("shared");
        let owner = NamedSemaphore::create(&name, 0o600).unwrap();
        let other = NamedSemaphore::open(&name).unwrap();

        // when (操作):
        let guard = owner.acquire().unwrap();
        let busy = unsafe { libc::sem_trywait(other.sem) };
        drop(guard);
        let free = unsafe { libc::sem_trywait(other.sem) };

        // then (期待する結果):
        assert_eq!(busy, -1);
        assert_eq!(free, 0);
        other.release().unwrap();
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing_fails() {
        // テスト項目: 存在しないセマフォを開くとエラーになる
        // given (前提条件):
        let name = unique_name("missing");

        // when (操作):
        let result = NamedSemaphore::open(&name);

        // then (期待する結果):
        assert!(result.is_err());
        assert!(NamedSemaphore::unlink(&name).is_ok());
    }
}
