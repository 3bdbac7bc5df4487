//! Repodata cache: paths, state sidecar, staleness and locking
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`path`] - Cache key derivation and entry file names
//! - [`state`] - Typed state sidecar, legacy migration and staleness rules
//! - [`lock`] - Advisory lock guarding each entry's read-modify-write
//! - [`manager`] - Cache entry with atomic replace and refresh
//!
//! # Examples
//!
//! ```rust,no_run
//! use repodata_sync::app::cache::{CacheConfig, RepodataCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RepodataCache::for_url(
//!     "https://conda.anaconda.org/conda-forge/noarch",
//!     "repodata.json",
//!     CacheConfig::default(),
//! )
//! .await?;
//!
//! let lock = cache.lock().await?;
//! let mut state = cache.load_state().await;
//! if !cache.stale(&state, chrono::Utc::now()) {
//!     println!("cached copy is fresh");
//! }
//! cache.refresh(&lock, &mut state).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod lock;
pub mod manager;
pub mod path;
pub mod state;

pub use config::CacheConfig;
pub use lock::{CacheLock, LockMode};
pub use manager::{stat_fingerprint, RepodataCache};
pub use path::{cache_fn_url, CachePaths};
pub use state::{cache_control_max_age, FormatCheck, JlapState, RepodataFormat, RepodataState};
