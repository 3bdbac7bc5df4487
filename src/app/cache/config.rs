//! Cache configuration types and defaults
//!
//! This module contains the configuration for the repodata cache: where it
//! lives, how staleness is decided and how hard to try for the file lock.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{files, lock, repodata, state};

/// Configuration for the repodata cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cache storage (OS-specific if None)
    pub cache_root: Option<PathBuf>,
    /// 0 = always revalidate, 1 = honour Cache-Control max-age, N = N seconds
    pub local_repodata_ttl: u64,
    /// How long a negative capability flag suppresses re-probing
    pub check_format_interval: Duration,
    /// Lock attempts before `LockError::Timeout`
    pub lock_attempts: u32,
    /// Sleep between lock attempts
    pub lock_retry_interval: Duration,
    /// Skip locking entirely
    pub no_lock: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // Will use OS-specific cache directory
            local_repodata_ttl: repodata::DEFAULT_LOCAL_TTL,
            check_format_interval: state::CHECK_FORMAT_INTERVAL,
            lock_attempts: lock::ATTEMPTS,
            lock_retry_interval: lock::RETRY_INTERVAL,
            no_lock: false,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with custom cache root
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Set the local TTL policy
    pub fn with_local_ttl(mut self, ttl: u64) -> Self {
        self.local_repodata_ttl = ttl;
        self
    }

    /// Set the capability re-check interval
    pub fn with_check_format_interval(mut self, interval: Duration) -> Self {
        self.check_format_interval = interval;
        self
    }

    /// Set the lock retry budget
    pub fn with_lock_retries(mut self, attempts: u32, interval: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_retry_interval = interval;
        self
    }

    /// Enable or disable locking
    pub fn with_no_lock(mut self, no_lock: bool) -> Self {
        self.no_lock = no_lock;
        self
    }

    /// Configured root, or the per-user cache directory
    pub fn resolve_cache_root(&self) -> PathBuf {
        self.cache_root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|dir| dir.join(files::APP_DIR))
                .unwrap_or_else(|| PathBuf::from("./cache"))
        })
    }
}
