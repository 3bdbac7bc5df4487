//! Advisory lock serialising writers of one cache entry
//!
//! The lock is an exclusive `flock`-style lock on `<base>.lock`, a file that
//! is never replaced, so the data and state files can still be swapped in by
//! rename while the lock is held. Acquisition polls with a bounded number of
//! attempts. Filesystems without lock support degrade to an unlocked guard
//! whose [`LockMode`] says so.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{LockError, LockResult};

/// How a [`CacheLock`] protects its cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive OS lock held
    Exclusive,
    /// Locking switched off by configuration
    Disabled,
    /// The filesystem refused to lock; no inter-process protection
    Unsupported,
}

/// Guard held for the duration of a read-modify-write of a cache entry
#[derive(Debug)]
pub struct CacheLock {
    file: Option<File>,
    path: PathBuf,
    mode: LockMode,
}

impl CacheLock {
    /// Acquire the lock on `path`, creating the file if needed
    ///
    /// # Arguments
    ///
    /// * `path` - Lock file
    /// * `attempts` - Tries before giving up (at least one)
    /// * `interval` - Sleep between tries
    ///
    /// # Errors
    ///
    /// * `LockError::Timeout` if another holder kept the lock for every attempt
    /// * `LockError::Io` if the lock file cannot be opened or locked
    pub async fn acquire(path: &Path, attempts: u32, interval: Duration) -> LockResult<Self> {
        let io_error = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(io_error)?
            .into_std()
            .await;

        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!("Locked {} (attempt {})", path.display(), attempt);
                    return Ok(Self {
                        file: Some(file),
                        path: path.to_path_buf(),
                        mode: LockMode::Exclusive,
                    });
                }
                Err(e) if e.kind() == ErrorKind::Unsupported => {
                    warn!(
                        "File locking unsupported for {}; continuing without inter-process protection",
                        path.display()
                    );
                    return Ok(Self {
                        file: None,
                        path: path.to_path_buf(),
                        mode: LockMode::Unsupported,
                    });
                }
                Err(e) if is_contended(&e) => {
                    debug!(
                        "{} is locked, attempt {}/{}",
                        path.display(),
                        attempt,
                        attempts
                    );
                    if attempt < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }
                Err(e) => return Err(io_error(e)),
            }
        }

        Err(LockError::Timeout {
            path: path.to_path_buf(),
            attempts,
        })
    }

    /// Guard that performs no locking
    pub fn disabled(path: &Path) -> Self {
        Self {
            file: None,
            path: path.to_path_buf(),
            mode: LockMode::Disabled,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether other processes are actually excluded
    pub fn is_enforced(&self) -> bool {
        self.mode == LockMode::Exclusive
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = fs2::FileExt::unlock(&file) {
                warn!("Failed to unlock {}: {}", self.path.display(), e);
            } else {
                debug!("Released lock {}", self.path.display());
            }
        }
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
