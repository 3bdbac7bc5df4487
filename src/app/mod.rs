//! Core application logic for repodata_sync
//!
//! This module contains the JLAP codec, the cache entry and its lock, the
//! HTTP transport, and the engine that keeps a cached repodata document in
//! step with its channel.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repodata_sync::app::{CacheConfig, ClientConfig, HttpHandler, RepodataFetch, SyncConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpHandler::from_config(&ClientConfig::default())?);
//! let fetch = RepodataFetch::for_channel(
//!     "https://conda.anaconda.org/conda-forge/linux-64",
//!     CacheConfig::default(),
//!     transport,
//!     SyncConfig::default(),
//! )
//! .await?;
//!
//! let (path, state) = fetch.fetch_latest_path().await?;
//! println!("{} at {:?}", path.display(), state.nominal_hash);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod fetch;
pub mod hash;
pub mod jlap;

// Re-export main public API
pub use cache::{
    CacheConfig, CacheLock, LockMode, RepodataCache, RepodataFormat, RepodataState,
};
pub use client::{ClientConfig, HttpHandler, Transport};
pub use fetch::{
    FetchOutcome, LatestRepodata, RepoInterface, RepoInterfaceKind, RepodataFetch, SyncConfig,
};
pub use hash::Blake2Hash;
pub use jlap::{Jlap, PatchRecord};
