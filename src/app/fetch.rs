//! Fetching the latest repodata for a channel
//!
//! [`RepodataFetch`] is the entry point: it takes the cache entry's lock,
//! decides whether the cached copy may be served as is, and otherwise runs a
//! [`RepoInterface`] to update it.
//!
//! # Module Organization
//!
//! - [`jlap`] - Ranged `.jlap` requests and verification
//! - [`engine`] - Full-download / incremental state machine
//! - [`interface`] - Interface kinds and the fetch-into-cache step
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repodata_sync::app::cache::CacheConfig;
//! use repodata_sync::app::client::{ClientConfig, HttpHandler};
//! use repodata_sync::app::fetch::{RepodataFetch, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpHandler::from_config(&ClientConfig::default())?);
//! let fetch = RepodataFetch::for_channel(
//!     "https://conda.anaconda.org/conda-forge/noarch",
//!     CacheConfig::default(),
//!     transport,
//!     SyncConfig::default(),
//! )
//! .await?;
//!
//! let (repodata, state) = fetch.fetch_latest_parsed().await?;
//! println!("{} packages at {:?}", repodata["packages"].as_object().map_or(0, |p| p.len()), state.nominal_hash);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

pub mod engine;
pub mod interface;
pub mod jlap;

pub use engine::{Strategy, SyncEngine, SyncOptions, SyncOutcome};
pub use interface::{FetchOutcome, RepoInterface, RepoInterfaceKind};
pub use jlap::{fetch_jlap, process_jlap_response, request_jlap, JlapResponse};

use crate::app::cache::{CacheConfig, RepodataCache, RepodataState};
use crate::app::client::Transport;
use crate::constants::repodata;
use crate::errors::{CacheError, CacheResult, SyncResult};

/// Per-channel fetch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Document name inside the channel subdirectory
    pub repodata_fn: String,
    pub interface: RepoInterfaceKind,
    /// Never touch the network; serve whatever is cached
    pub offline: bool,
    /// Serve any cached copy regardless of staleness
    pub use_index_cache: bool,
    /// Ignore freshness and skip the incremental path
    pub force_full: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repodata_fn: repodata::REPODATA_FN.to_string(),
            interface: RepoInterfaceKind::default(),
            offline: false,
            use_index_cache: false,
            force_full: false,
        }
    }
}

/// Latest repodata, either as a file or already parsed
#[derive(Debug, Clone, PartialEq)]
pub enum LatestRepodata {
    OnDisk(PathBuf),
    Parsed(Value),
}

/// Fetches the latest document for one channel subdirectory
pub struct RepodataFetch {
    channel_url: String,
    cache: RepodataCache,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
}

impl RepodataFetch {
    pub fn new(
        channel_url: impl Into<String>,
        cache: RepodataCache,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            channel_url: channel_url.into(),
            cache,
            transport,
            config,
        }
    }

    /// Fetcher using the cache entry derived from `channel_url`
    pub async fn for_channel(
        channel_url: &str,
        cache_config: CacheConfig,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> CacheResult<Self> {
        let cache = RepodataCache::for_url(channel_url, &config.repodata_fn, cache_config).await?;
        Ok(Self::new(channel_url, cache, transport, config))
    }

    pub fn cache(&self) -> &RepodataCache {
        &self.cache
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Latest repodata and the state describing it
    ///
    /// The entry's lock is held for the whole read-modify-write. A fresh
    /// cached copy is served without network access, as is any cached copy
    /// when `offline` or `use_index_cache` is set; with no cached copy those
    /// modes yield an empty document.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the lock cannot be taken or the update fails.
    /// Capability flags learned before the failure are still saved.
    pub async fn fetch_latest(&self) -> SyncResult<(LatestRepodata, RepodataState)> {
        let lock = self.cache.lock().await?;
        let mut state = self.cache.load_state().await;
        let json_path = self.cache.json_path();
        let json_exists = json_path.exists();
        let now = Utc::now();

        if json_exists && !self.config.force_full {
            let stale = self.cache.stale(&state, now);
            if self.config.use_index_cache || self.config.offline || !stale {
                info!(
                    "Using cached repodata for {} at {}. Timeout in {:.0} sec",
                    self.channel_url,
                    json_path.display(),
                    self.cache.timeout(&state, now)
                );
                return Ok((LatestRepodata::OnDisk(json_path), state));
            }
        } else if !json_exists && (self.config.offline || self.config.use_index_cache) {
            info!("No cached repodata for {} and network disabled", self.channel_url);
            return Ok((LatestRepodata::Parsed(Value::Object(Default::default())), state));
        }

        let interface = RepoInterface::new(
            self.config.interface,
            &self.channel_url,
            &self.config.repodata_fn,
            self.transport.as_ref(),
            &self.cache,
        )?
        .with_force_full(self.config.force_full);

        match interface.fetch(&lock, &mut state).await {
            Ok(FetchOutcome::Unchanged) => {
                self.cache.refresh(&lock, &mut state).await?;
                Ok((LatestRepodata::OnDisk(json_path), state))
            }
            Ok(FetchOutcome::WrittenToDisk(path)) => Ok((LatestRepodata::OnDisk(path), state)),
            Ok(FetchOutcome::Parsed(doc)) => Ok((LatestRepodata::Parsed(doc), state)),
            Err(e) => {
                if let Err(save_error) = self.cache.save_state(&lock, &state).await {
                    warn!("Could not save capability flags: {}", save_error);
                }
                Err(e)
            }
        }
    }

    /// Latest repodata parsed into memory
    pub async fn fetch_latest_parsed(&self) -> SyncResult<(Value, RepodataState)> {
        let (latest, state) = self.fetch_latest().await?;
        let doc = match latest {
            LatestRepodata::Parsed(doc) => doc,
            LatestRepodata::OnDisk(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|source| CacheError::Io { path, source })?;
                serde_json::from_slice(&bytes)?
            }
        };
        Ok((doc, state))
    }

    /// Path of the latest repodata
    ///
    /// The path may not exist when offline with nothing cached.
    pub async fn fetch_latest_path(&self) -> SyncResult<(PathBuf, RepodataState)> {
        let (_, state) = self.fetch_latest().await?;
        Ok((self.cache.json_path(), state))
    }

    /// Cached document text and state, without any network access
    pub async fn read_cache(&self) -> SyncResult<(String, RepodataState)> {
        Ok(self.cache.load().await?)
    }
}
