//! Advisory file locks around log files.
//!
//! Writers take an exclusive lock on `<log>.lock` for the duration of one
//! append (torn-tail repair plus the write itself); readers take a shared
//! lock so they never observe a half-repaired tail. These are cross-process
//! locks. In-process serialization of entity mutations lives in the cache.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use fs2::FileExt;

use crate::error::ErrorCode;

/// Default wait before giving up on a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Advisory lock errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock timed out after {waited:?} at {}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StorageFailure,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[derive(Clone, Copy)]
enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct FileGuard {
    file: File,
    path: PathBuf,
}

impl FileGuard {
    fn acquire(path: &Path, timeout: Duration, kind: LockKind) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        loop {
            // fs2 by path; std's inherent `File::try_lock*` has another signature.
            let attempt = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            if attempt.is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Exclusive lock held while appending to a log.
#[derive(Debug)]
pub struct WriteLock {
    guard: FileGuard,
}

impl WriteLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Ok(Self {
            guard: FileGuard::acquire(path, timeout, LockKind::Exclusive)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Shared lock held while reading a log.
#[derive(Debug)]
pub struct ReadLock {
    guard: FileGuard,
}

impl ReadLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Ok(Self {
            guard: FileGuard::acquire(path, timeout, LockKind::Shared)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// Lock file path guarding `log`: the log path with `.lock` appended.
#[must_use]
pub fn lock_path_for(log: &Path) -> PathBuf {
    let mut name = log.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_lock_acquire_and_drop() -> Result<(), LockError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.lock");
        let lock = WriteLock::acquire(&path, Duration::from_millis(50))?;
        assert_eq!(lock.path(), path.as_path());
        drop(lock);
        let _again = WriteLock::acquire(&path, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn read_locks_share() -> Result<(), LockError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("r.lock");
        let _a = ReadLock::acquire(&path, Duration::from_millis(50))?;
        let _b = ReadLock::acquire(&path, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn write_lock_times_out_while_read_held() -> Result<(), LockError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("c.lock");
        let _reader = ReadLock::acquire(&path, Duration::from_millis(50))?;
        let err = WriteLock::acquire(&path, Duration::from_millis(20))
            .expect_err("exclusive lock must wait for the reader");
        assert!(matches!(&err, LockError::Timeout { path: p, .. } if *p == path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
        Ok(())
    }

    #[test]
    fn waiting_writer_gets_lock_once_reader_drops() -> Result<(), LockError> {
        let dir = TempDir::new()?;
        let path = dir.path().join("w.lock");
        let reader = ReadLock::acquire(&path, Duration::from_millis(50))?;
        let waiter = {
            let path = path.clone();
            thread::spawn(move || WriteLock::acquire(&path, Duration::from_secs(2)).map(drop))
        };
        thread::sleep(Duration::from_millis(30));
        drop(reader);
        waiter.join().expect("writer thread")?;
        Ok(())
    }

    #[test]
    fn lock_path_appends_suffix() {
        let p = lock_path_for(Path::new("/x/entities/abc.ops"));
        assert_eq!(p, PathBuf::from("/x/entities/abc.ops.lock"));
    }
}
