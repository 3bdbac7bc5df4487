//! Prelude module for repodata_sync
//!
//! Re-exports the items most integrations need, so a single
//! `use repodata_sync::prelude::*;` is enough to fetch repodata.
//!
//! # Usage
//!
//! ```rust,no_run
//! use repodata_sync::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = Arc::new(HttpHandler::from_config(&ClientConfig::default())?);
//!     let fetch = RepodataFetch::for_channel(
//!         "https://conda.anaconda.org/conda-forge/noarch",
//!         CacheConfig::default(),
//!         transport,
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!
//!     let (_repodata, state) = fetch.fetch_latest_parsed().await?;
//!     println!("{:?}", state.nominal_hash);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

pub use crate::app::{
    Blake2Hash, CacheConfig, CacheLock, ClientConfig, FetchOutcome, HttpHandler, Jlap,
    LatestRepodata, PatchRecord, RepoInterfaceKind, RepodataCache, RepodataFetch, RepodataState,
    SyncConfig, Transport,
};

pub use crate::constants::{REPODATA_FN, USER_AGENT};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prelude_imports() {
        let _client_config = ClientConfig::default();
        let sync_config = SyncConfig::default();

        assert_eq!(sync_config.repodata_fn, REPODATA_FN);
        assert_eq!(sync_config.interface, RepoInterfaceKind::Jlap);
        assert!(USER_AGENT.starts_with("repodata-sync/"));
    }

    #[tokio::test]
    async fn test_prelude_integration_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let cache = RepodataCache::for_url(
            "https://conda.anaconda.org/conda-forge/noarch",
            REPODATA_FN,
            CacheConfig::with_cache_root(temp_dir.path().to_path_buf()),
        )
        .await
        .unwrap();

        let state = cache.load_state().await;
        assert_eq!(state, RepodataState::default());
        assert!(cache.json_path().starts_with(temp_dir.path()));
    }
}
