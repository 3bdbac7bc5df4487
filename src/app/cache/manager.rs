//! Repodata cache entry with atomic operations
//!
//! [`RepodataCache`] owns one `<base>.json` / `<base>.state.json` pair.
//! Mutating operations require a [`CacheLock`] guard so every writer goes
//! through the lock, and every write lands by rename so unlocked readers only
//! ever see complete files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::config::CacheConfig;
use super::lock::CacheLock;
use super::path::CachePaths;
use super::state::RepodataState;
use crate::errors::{CacheError, CacheResult, LockResult};

/// One cached repodata document and its state sidecar
#[derive(Debug, Clone)]
pub struct RepodataCache {
    paths: CachePaths,
    config: CacheConfig,
}

impl RepodataCache {
    /// Cache entry at `base` (without extension)
    pub fn new(base: impl Into<PathBuf>, config: CacheConfig) -> Self {
        Self {
            paths: CachePaths::new(base),
            config,
        }
    }

    /// Cache entry for a channel URL under the configured cache root
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DirectoryNotAccessible` if the cache directory
    /// cannot be created.
    pub async fn for_url(url: &str, repodata_fn: &str, config: CacheConfig) -> CacheResult<Self> {
        let cache_dir = config.resolve_cache_root();
        Self::ensure_directory_exists(&cache_dir).await?;
        Ok(Self {
            paths: CachePaths::for_url(&cache_dir, url, repodata_fn),
            config,
        })
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn json_path(&self) -> PathBuf {
        self.paths.json_path()
    }

    pub fn state_path(&self) -> PathBuf {
        self.paths.state_path()
    }

    /// Ensure a directory exists, creating it if necessary
    async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
        if !path.exists() {
            fs::create_dir_all(path).await.map_err(|e| {
                error!("Failed to create cache directory: {}", e);
                CacheError::DirectoryNotAccessible {
                    path: path.to_path_buf(),
                }
            })?;
            debug!("Created cache directory: {}", path.display());
        }
        Ok(())
    }

    /// Take the entry's lock using the configured retry budget
    pub async fn lock(&self) -> LockResult<CacheLock> {
        self.lock_with(self.config.lock_attempts, self.config.lock_retry_interval)
            .await
    }

    /// Single attempt at the entry's lock
    ///
    /// Fails with `LockError::Timeout` straight away while another holder
    /// has it.
    pub async fn try_lock(&self) -> LockResult<CacheLock> {
        self.lock_with(1, Duration::ZERO).await
    }

    async fn lock_with(&self, attempts: u32, interval: Duration) -> LockResult<CacheLock> {
        let lock_path = self.paths.lock_path();
        if self.config.no_lock {
            return Ok(CacheLock::disabled(&lock_path));
        }
        if let Some(parent) = lock_path.parent() {
            // A missing directory surfaces as a lock I/O error below
            let _ = fs::create_dir_all(parent).await;
        }
        CacheLock::acquire(&lock_path, attempts, interval).await
    }

    /// Load the state sidecar, falling back to a cold state
    ///
    /// Never fails: a missing, unreadable or corrupt state file, or one whose
    /// fingerprint does not match the data file, yields a state without
    /// validators or hashes.
    pub async fn load_state(&self) -> RepodataState {
        let state_path = self.state_path();
        let mut state = match fs::read(&state_path).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| e.to_string())
                .and_then(RepodataState::migrate)
            {
                Ok(state) => state,
                Err(reason) => {
                    warn!(
                        "{}",
                        CacheError::CorruptState {
                            path: state_path.clone(),
                            reason
                        }
                    );
                    RepodataState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepodataState::default(),
            Err(e) => {
                warn!("Could not read {}: {}", state_path.display(), e);
                RepodataState::default()
            }
        };

        match stat_fingerprint(&self.json_path()).await {
            Some((mtime_ns, size)) if state.fingerprint_matches(mtime_ns, size) => {}
            fingerprint => {
                if state.nominal_hash.is_some() || state.etag.is_some() || state.last_modified.is_some() {
                    warn!(
                        "{}",
                        CacheError::CorruptState {
                            path: state_path,
                            reason: format!(
                                "fingerprint {:?}/{:?} does not match data file {:?}",
                                state.mtime_ns, state.size, fingerprint
                            ),
                        }
                    );
                }
                state.make_cold();
            }
        }
        state
    }

    /// Read the cached document text and its state
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the document cannot be read.
    pub async fn load(&self) -> CacheResult<(String, RepodataState)> {
        let state = self.load_state().await;
        let json_path = self.json_path();
        let text = fs::read_to_string(&json_path)
            .await
            .map_err(|source| CacheError::Io {
                path: json_path,
                source,
            })?;
        Ok((text, state))
    }

    /// Whether the cached document must be revalidated
    pub fn stale(&self, state: &RepodataState, now: DateTime<Utc>) -> bool {
        state.stale(now, self.config.local_repodata_ttl)
    }

    /// Seconds until the cached document goes stale
    pub fn timeout(&self, state: &RepodataState, now: DateTime<Utc>) -> f64 {
        state.timeout(now, self.config.local_repodata_ttl)
    }

    /// Write `data` as the cached document and persist `state`
    pub async fn save(
        &self,
        lock: &CacheLock,
        data: &[u8],
        state: &mut RepodataState,
    ) -> CacheResult<()> {
        let temp_path = self.paths.temp_path();
        fs::write(&temp_path, data)
            .await
            .map_err(|source| CacheError::Io {
                path: temp_path.clone(),
                source,
            })?;
        self.replace(lock, &temp_path, state).await
    }

    /// Move a fully written temp file into place, then persist `state`
    ///
    /// The state file is only written after the rename, so it never claims
    /// content the data file does not hold.
    pub async fn replace(
        &self,
        _lock: &CacheLock,
        temp_path: &Path,
        state: &mut RepodataState,
    ) -> CacheResult<()> {
        let json_path = self.json_path();
        let (mtime_ns, size) = stat_fingerprint(temp_path).await.ok_or_else(|| {
            CacheError::AtomicOperationFailed {
                temp_path: temp_path.to_path_buf(),
                final_path: json_path.clone(),
            }
        })?;

        fs::rename(temp_path, &json_path).await.map_err(|e| {
            error!("Failed to rename temporary file: {}", e);
            CacheError::AtomicOperationFailed {
                temp_path: temp_path.to_path_buf(),
                final_path: json_path.clone(),
            }
        })?;

        state.set_fingerprint(mtime_ns, size);
        state.refresh(Utc::now());
        self.write_state(state).await?;
        info!("Updated {} ({} bytes)", json_path.display(), size);
        Ok(())
    }

    /// Mark the document as confirmed current and persist `state`
    pub async fn refresh(&self, _lock: &CacheLock, state: &mut RepodataState) -> CacheResult<()> {
        if let Some((mtime_ns, size)) = stat_fingerprint(&self.json_path()).await {
            state.set_fingerprint(mtime_ns, size);
        }
        state.refresh(Utc::now());
        self.write_state(state).await
    }

    /// Persist `state` without touching the document
    pub async fn save_state(&self, _lock: &CacheLock, state: &RepodataState) -> CacheResult<()> {
        self.write_state(state).await
    }

    async fn write_state(&self, state: &RepodataState) -> CacheResult<()> {
        let data = serde_json::to_vec_pretty(state)?;
        let state_path = self.state_path();
        let dir = self.paths.cache_dir().to_path_buf();

        let target = state_path.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::Builder::new()
                .prefix(".state")
                .suffix(crate::constants::files::TEMP_FILE_SUFFIX)
                .tempfile_in(&dir)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        result
            .and_then(|inner| inner)
            .map_err(|source| CacheError::Io {
                path: state_path.clone(),
                source,
            })?;
        debug!("Wrote cache state {}", state_path.display());
        Ok(())
    }
}

/// `(mtime_ns, size)` of `path`, or `None` if it cannot be stat'ed
pub async fn stat_fingerprint(path: &Path) -> Option<(i64, u64)> {
    let metadata = fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    let mtime_ns = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
    Some((i64::try_from(mtime_ns).ok()?, metadata.len()))
}
