//! Repo-interface strategy selector
//!
//! Each [`RepoInterfaceKind`] is the same engine with a different set of
//! transport formats enabled. [`RepoInterface::fetch`] runs it against a
//! scratch copy of the state and moves the result into the cache.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::engine::{SyncEngine, SyncOptions, SyncOutcome};
use crate::app::cache::{CacheLock, RepodataCache, RepodataState};
use crate::app::client::{repodata_url, Transport};
use crate::errors::SyncResult;

/// Transport formats a channel is fetched with
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RepoInterfaceKind {
    /// `.json` only
    Plain,
    /// `.json.zst`, falling back to `.json`
    Zstd,
    /// `.jlap` patches when a local copy exists, otherwise like `zstd`
    #[default]
    Jlap,
}

impl RepoInterfaceKind {
    pub fn options(self, force_full: bool) -> SyncOptions {
        let (allow_zst, allow_jlap) = match self {
            RepoInterfaceKind::Plain => (false, false),
            RepoInterfaceKind::Zstd => (true, false),
            RepoInterfaceKind::Jlap => (true, true),
        };
        SyncOptions {
            allow_zst,
            allow_jlap,
            force_full,
        }
    }
}

impl fmt::Display for RepoInterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoInterfaceKind::Plain => "plain",
            RepoInterfaceKind::Zstd => "zstd",
            RepoInterfaceKind::Jlap => "jlap",
        };
        f.write_str(name)
    }
}

/// What the caller has to do after a fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Nothing changed; the cached file is current
    Unchanged,
    /// A new document was written; read it from this path
    WrittenToDisk(PathBuf),
    /// A new document was written and is also returned parsed
    Parsed(Value),
}

/// One channel document fetched through one interface kind
pub struct RepoInterface<'a> {
    kind: RepoInterfaceKind,
    channel_url: String,
    url: Url,
    transport: &'a dyn Transport,
    cache: &'a RepodataCache,
    force_full: bool,
}

impl<'a> RepoInterface<'a> {
    /// Interface for `repodata_fn` under `channel_url`
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidUrl` if the document URL does not parse.
    pub fn new(
        kind: RepoInterfaceKind,
        channel_url: &str,
        repodata_fn: &str,
        transport: &'a dyn Transport,
        cache: &'a RepodataCache,
    ) -> SyncResult<Self> {
        debug!("Using {} interface for {}", kind, channel_url);
        Ok(Self {
            kind,
            channel_url: channel_url.to_string(),
            url: repodata_url(channel_url, repodata_fn)?,
            transport,
            cache,
            force_full: false,
        })
    }

    pub fn with_force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    pub fn kind(&self) -> RepoInterfaceKind {
        self.kind
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Bring the cache entry up to date under `lock`
    ///
    /// On success `state` describes the cached file and, for new content, has
    /// been persisted along with it. On failure only the capability flags
    /// learned during the attempt are copied into `state`.
    pub async fn fetch(
        &self,
        lock: &CacheLock,
        state: &mut RepodataState,
    ) -> SyncResult<FetchOutcome> {
        let mut working = state.clone();
        let temp_path = self.cache.paths().temp_path();
        let engine = SyncEngine::new(self.transport, self.cache, self.kind.options(self.force_full));

        let result = engine.sync(&self.url, &mut working, &temp_path).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                state.has_zst = working.has_zst;
                state.has_jlap = working.has_jlap;
                remove_temp(&temp_path).await;
                return Err(e);
            }
        };

        working.url = Some(self.channel_url.clone());
        *state = working;

        let outcome = match outcome {
            SyncOutcome::NotModified | SyncOutcome::UpToDate => {
                remove_temp(&temp_path).await;
                FetchOutcome::Unchanged
            }
            SyncOutcome::Downloaded => {
                self.replace(lock, &temp_path, state).await?;
                FetchOutcome::WrittenToDisk(self.cache.json_path())
            }
            SyncOutcome::Patched(doc) => {
                self.replace(lock, &temp_path, state).await?;
                FetchOutcome::Parsed(doc)
            }
        };
        Ok(outcome)
    }

    async fn replace(
        &self,
        lock: &CacheLock,
        temp_path: &std::path::Path,
        state: &mut RepodataState,
    ) -> SyncResult<()> {
        let result = self.cache.replace(lock, temp_path, state).await;
        if result.is_err() {
            remove_temp(temp_path).await;
        }
        Ok(result?)
    }
}

async fn remove_temp(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_options() {
        let plain = RepoInterfaceKind::Plain.options(false);
        assert!(!plain.allow_zst && !plain.allow_jlap);

        let zstd = RepoInterfaceKind::Zstd.options(false);
        assert!(zstd.allow_zst && !zstd.allow_jlap);

        let jlap = RepoInterfaceKind::Jlap.options(true);
        assert!(jlap.allow_zst && jlap.allow_jlap && jlap.force_full);
    }

    #[test]
    fn test_interface_kind_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            interface: RepoInterfaceKind,
        }
        let parsed: Wrapper = toml::from_str("interface = \"zstd\"").unwrap();
        assert_eq!(parsed.interface, RepoInterfaceKind::Zstd);
        assert_eq!(RepoInterfaceKind::default().to_string(), "jlap");
    }
}
