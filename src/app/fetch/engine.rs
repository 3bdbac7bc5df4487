//! Patch fetch and apply engine
//!
//! One call to [`SyncEngine::sync`] brings the cached document from its
//! `nominal_hash` to the server's latest revision. The attempt either runs
//! incrementally (ranged `.jlap`, verify, apply, persist) or downloads the
//! whole document, and falls back from the first to the second at most once.

use std::future::Future;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::fs::{self, File};
use tokio::io::BufWriter;
use tracing::{debug, info, warn};
use url::Url;

use super::jlap::{fetch_jlap, JlapResponse};
use crate::app::cache::{RepodataCache, RepodataFormat, RepodataState};
use crate::app::client::{conditional_headers, with_ext, Compression, DownloadHandler, Transport};
use crate::app::hash::{Blake2Hash, HashWriter};
use crate::app::jlap::patch::short;
use crate::app::jlap::{apply_patches, find_patches, Jlap, PatchRecord};
use crate::constants::jlap::{DEFAULT_IV, JLAP_EXT, ZST_EXT};
use crate::errors::{CacheError, DownloadError, SyncError, SyncResult};

/// Which transport formats one sync may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Try `.json.zst` before `.json`
    pub allow_zst: bool,
    /// Try `.jlap` when a local revision is known
    pub allow_jlap: bool,
    /// Skip the incremental path
    pub force_full: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            allow_zst: true,
            allow_jlap: true,
            force_full: false,
        }
    }
}

/// How an attempt obtains the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FullDownload,
    Incremental,
}

/// Result of one successful sync
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Server answered 304; the local file is current
    NotModified,
    /// The log holds no patches past the local revision
    UpToDate,
    /// A full document was written to the temp path
    Downloaded,
    /// Patches were applied; the result is in memory and at the temp path
    Patched(Value),
}

/// Log how long `fut` took at debug level
async fn timed<F: Future>(message: &str, fut: F) -> F::Output {
    let begin = Instant::now();
    let output = fut.await;
    debug!("{} took {:.2}s", message, begin.elapsed().as_secs_f64());
    output
}

/// Runs the strategy state machine for one cache entry
pub struct SyncEngine<'a> {
    transport: &'a dyn Transport,
    cache: &'a RepodataCache,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(transport: &'a dyn Transport, cache: &'a RepodataCache, options: SyncOptions) -> Self {
        Self {
            transport,
            cache,
            options,
        }
    }

    /// Choose the first strategy for `state`
    ///
    /// Incremental requires a known nominal hash, the document on disk and a
    /// `.jlap` capability flag that is not in its probation window.
    pub fn select_strategy(&self, state: &RepodataState, json_exists: bool) -> Strategy {
        let interval = self.cache.config().check_format_interval;
        if self.options.force_full || !self.options.allow_jlap {
            Strategy::FullDownload
        } else if state.nominal_hash.is_none() || !json_exists {
            Strategy::FullDownload
        } else if !state.should_check_format(RepodataFormat::Jlap, Utc::now(), interval) {
            debug!("Skipping .jlap during its probation window");
            Strategy::FullDownload
        } else {
            Strategy::Incremental
        }
    }

    /// Bring `state` and the document at `temp_path` up to date with `url`
    ///
    /// `url` names the plain `.json` document; sibling resources are derived
    /// from it. On `Downloaded` and `Patched` the new document is at
    /// `temp_path` and `state` describes it; moving it into place is left to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt. An incremental failure that
    /// [`SyncError::falls_back_to_full_download`] is retried as a full
    /// download; a full download is only repeated for transient errors. At
    /// most one retry happens per call.
    pub async fn sync(
        &self,
        url: &Url,
        state: &mut RepodataState,
        temp_path: &Path,
    ) -> SyncResult<SyncOutcome> {
        let json_exists = self.cache.json_path().exists();
        let mut strategy = self.select_strategy(state, json_exists);
        let mut retried = false;

        loop {
            info!("Fetching {} ({:?})", url, strategy);
            let result = match strategy {
                Strategy::FullDownload => {
                    timed("Full download", self.full_download(url, state, temp_path, json_exists))
                        .await
                }
                Strategy::Incremental => {
                    timed("Incremental update", self.incremental(url, state, temp_path)).await
                }
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e)
                    if !retried
                        && e.falls_back_to_full_download()
                        && (strategy == Strategy::Incremental || e.is_transient()) =>
                {
                    warn!("{:?} of {} failed: {}. Retrying with a full download", strategy, url, e);
                    if strategy == Strategy::Incremental {
                        // The local copy is suspect; a 304 must not keep it
                        state.etag = None;
                        state.last_modified = None;
                    }
                    retried = true;
                    strategy = Strategy::FullDownload;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Conditional GET of `.json.zst`, then `.json`
    async fn full_download(
        &self,
        url: &Url,
        state: &mut RepodataState,
        temp_path: &Path,
        json_exists: bool,
    ) -> SyncResult<SyncOutcome> {
        // A 304 is useless without a hash to vouch for the local file
        if state.nominal_hash.is_none() {
            state.etag = None;
            state.last_modified = None;
        }

        let interval = self.cache.config().check_format_interval;
        let headers = conditional_headers(state, json_exists);
        let handler = DownloadHandler::new(self.transport);
        let now = Utc::now();

        let mut download = None;
        if self.options.allow_zst && state.should_check_format(RepodataFormat::Zst, now, interval) {
            let zst_url = with_ext(url, ZST_EXT);
            match handler
                .download_and_hash(&zst_url, temp_path, headers.clone(), Compression::Zstd)
                .await
            {
                Ok(result) => {
                    state.set_has_format(RepodataFormat::Zst, true, now);
                    download = Some(result);
                }
                Err(e @ DownloadError::Decompress { .. }) => {
                    warn!("Could not decompress {} as zstd. Fall back to .json. ({})", zst_url, e);
                    state.set_has_format(RepodataFormat::Zst, false, now);
                }
                Err(e) if e.is_client_error() => {
                    info!("{} unavailable ({}). Fall back to .json", zst_url, e);
                    state.set_has_format(RepodataFormat::Zst, false, now);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let download = match download {
            Some(download) => download,
            None => {
                handler
                    .download_and_hash(url, temp_path, headers, Compression::None)
                    .await?
            }
        };

        if download.not_modified() {
            if !json_exists {
                return Err(DownloadError::UnexpectedStatus {
                    url: url.to_string(),
                    status: download.status.as_u16(),
                }
                .into());
            }
            if let Some(etag) = download.header("etag") {
                state.etag = Some(etag.to_string());
            }
            if let Some(modified) = download.header("last-modified") {
                state.last_modified = Some(modified.to_string());
            }
            if let Some(cache_control) = download.header("cache-control") {
                state.cache_control = Some(cache_control.to_string());
            }
            info!("{} not modified", url);
            return Ok(SyncOutcome::NotModified);
        }

        state.etag = download.header("etag").map(str::to_string);
        state.last_modified = download.header("last-modified").map(str::to_string);
        state.cache_control = download.header("cache-control").map(str::to_string);
        let hash = download.hash.map(|h| h.to_hex());
        state.nominal_hash = hash.clone();
        state.on_disk_hash = hash;
        Ok(SyncOutcome::Downloaded)
    }

    /// Range-fetch the log, then select, apply and persist patches
    async fn incremental(
        &self,
        url: &Url,
        state: &mut RepodataState,
        temp_path: &Path,
    ) -> SyncResult<SyncOutcome> {
        let Some(have) = state.nominal_hash.clone() else {
            return Ok(SyncOutcome::UpToDate);
        };
        let jlap_url = with_ext(url, JLAP_EXT);
        let prior = state.jlap.clone().unwrap_or_default();
        let (pos, iv) = match prior.iv_hash() {
            Some(iv) if prior.pos > 0 => (prior.pos, iv),
            _ => (0, Blake2Hash::from_bytes(DEFAULT_IV)),
        };
        debug!("Fetch {} from iv={}, pos={}", jlap_url, short(&iv.to_hex()), pos);

        let now = Utc::now();
        let fetched = match self.fetch_log(&jlap_url, pos, iv, prior.etag()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                state.set_has_format(RepodataFormat::Jlap, false, now);
                return Err(e);
            }
        };
        state.set_has_format(RepodataFormat::Jlap, true, now);

        let (log, jlap_state) = match fetched {
            JlapResponse::NotModified => {
                info!("{} not modified", jlap_url);
                return Ok(SyncOutcome::NotModified);
            }
            JlapResponse::Log { log, state } => (log, state),
        };

        if let Some(cache_control) = jlap_state.headers.get("cache-control") {
            state.cache_control = Some(cache_control.clone());
        }
        state.jlap = Some(jlap_state);
        self.keep_local_log(&log).await;

        let records = PatchRecord::from_log(&log)?;
        let want = log.latest()?;
        let apply = find_patches(&records, &have, &want)?;
        if apply.is_empty() {
            info!("{} is current at {}", url, short(&want));
            return Ok(SyncOutcome::UpToDate);
        }
        info!(
            "Apply {} patches {} \u{2192} {}",
            apply.len(),
            short(&have),
            short(&want)
        );

        let mut doc = timed("Load", self.load_local(state)).await?;
        timed("Apply patches", async { apply_patches(&mut doc, &apply) }).await?;
        let hash = timed("Write changed", self.persist(&doc, temp_path)).await?;

        state.on_disk_hash = Some(hash.to_hex());
        state.nominal_hash = Some(want);
        Ok(SyncOutcome::Patched(doc))
    }

    /// Ranged fetch, retried once as a complete fetch
    ///
    /// A 4xx other than 416 means the server has no log at all.
    async fn fetch_log(
        &self,
        url: &Url,
        pos: u64,
        iv: Blake2Hash,
        etag: Option<&str>,
    ) -> SyncResult<JlapResponse> {
        let first = fetch_jlap(self.transport, url, pos, iv, etag).await;
        let error = match first {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        if let Some(unavailable) = jlap_unavailable(url, &error) {
            return Err(unavailable);
        }
        let retry = match &error {
            SyncError::Codec(_) => true,
            SyncError::Download(e) => matches!(
                e,
                DownloadError::Status { .. } | DownloadError::UnexpectedStatus { .. }
            ),
            _ => false,
        };
        if !retry {
            return Err(error);
        }

        info!("JLAP range request failed ({}). Retry with complete JLAP", error);
        let complete = fetch_jlap(self.transport, url, 0, Blake2Hash::from_bytes(DEFAULT_IV), None).await;
        complete.map_err(|e| jlap_unavailable(url, &e).unwrap_or(e))
    }

    /// Write the fetched log beside the cache entry for inspection
    async fn keep_local_log(&self, log: &Jlap) {
        let path = self.cache.paths().jlap_path();
        if let Err(e) = log.write(&path).await {
            debug!("Could not write {}: {}", path.display(), e);
        }
    }

    /// Read the cached document, checking it is the one `state` describes
    async fn load_local(&self, state: &RepodataState) -> SyncResult<Value> {
        let path = self.cache.json_path();
        let bytes = fs::read(&path)
            .await
            .map_err(|source| CacheError::Io { path, source })?;
        let actual = Blake2Hash::digest(&bytes).to_hex();
        if let Some(expected) = &state.on_disk_hash {
            if *expected != actual {
                return Err(SyncError::ContentMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Compact sorted-key serialisation of `doc`, hashed while written
    async fn persist(&self, doc: &Value, temp_path: &Path) -> SyncResult<Blake2Hash> {
        let io_error = |source| CacheError::Io {
            path: temp_path.to_path_buf(),
            source,
        };
        let data = serde_json::to_vec(doc)?;
        let file = File::create(temp_path).await.map_err(io_error)?;
        let mut writer = HashWriter::new(BufWriter::new(file));
        writer.write_all(&data).await.map_err(io_error)?;
        let (_, hash, size) = writer.finish().await.map_err(io_error)?;
        debug!("Wrote {} bytes to {}", size, temp_path.display());
        Ok(hash)
    }
}

/// `JlapUnavailable` for a 4xx (not 416) answer
fn jlap_unavailable(url: &Url, error: &SyncError) -> Option<SyncError> {
    match error {
        SyncError::Download(e) if e.is_client_error() => Some(SyncError::JlapUnavailable {
            url: url.to_string(),
            status: e.status().unwrap_or_default(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::{CacheConfig, FormatCheck};
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoNetwork;

    #[async_trait::async_trait]
    impl Transport for NoNetwork {
        async fn get(
            &self,
            url: &Url,
            _headers: reqwest::header::HeaderMap,
        ) -> crate::errors::DownloadResult<crate::app::client::HttpResponse> {
            Err(DownloadError::Timeout {
                url: url.to_string(),
            })
        }
    }

    fn cache(dir: &TempDir) -> RepodataCache {
        RepodataCache::new(
            dir.path().join("abcd1234"),
            CacheConfig::with_cache_root(dir.path().to_path_buf()),
        )
    }

    #[test]
    fn test_strategy_selection() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let engine = SyncEngine::new(&NoNetwork, &cache, SyncOptions::default());

        let cold = RepodataState::default();
        assert_eq!(engine.select_strategy(&cold, true), Strategy::FullDownload);

        let warm = RepodataState {
            nominal_hash: Some("ab".repeat(32)),
            ..Default::default()
        };
        assert_eq!(engine.select_strategy(&warm, true), Strategy::Incremental);
        assert_eq!(engine.select_strategy(&warm, false), Strategy::FullDownload);

        let mut refused = warm.clone();
        refused.has_jlap = Some(FormatCheck {
            value: false,
            last_checked: Utc::now(),
        });
        assert_eq!(engine.select_strategy(&refused, true), Strategy::FullDownload);

        refused.has_jlap = Some(FormatCheck {
            value: false,
            last_checked: Utc::now() - chrono::Duration::days(8),
        });
        assert_eq!(engine.select_strategy(&refused, true), Strategy::Incremental);

        let forced = SyncEngine::new(
            &NoNetwork,
            &cache,
            SyncOptions {
                force_full: true,
                ..Default::default()
            },
        );
        assert_eq!(forced.select_strategy(&warm, true), Strategy::FullDownload);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once_then_surfaced() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let engine = SyncEngine::new(&NoNetwork, &cache, SyncOptions::default());
        let url = Url::parse("https://example.com/noarch/repodata.json").unwrap();
        let mut state = RepodataState::default();

        let err = engine
            .sync(&url, &mut state, &dir.path().join("abcd1234.0000.tmp"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Download(DownloadError::Timeout { .. })
        ));
        // A timeout says nothing about zstd support
        assert!(state.has_zst.is_none());
    }

    #[tokio::test]
    async fn test_persist_is_compact_and_sorted() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let engine = SyncEngine::new(&NoNetwork, &cache, SyncOptions::default());
        let temp = dir.path().join("out.tmp");
        let doc = serde_json::json!({"packages": {}, "info": {"subdir": "noarch"}});

        let hash = engine.persist(&doc, &temp).await.unwrap();
        let written = std::fs::read(&temp).unwrap();
        assert_eq!(written, br#"{"info":{"subdir":"noarch"},"packages":{}}"#);
        assert_eq!(hash, Blake2Hash::digest(&written));
    }

    #[tokio::test]
    async fn test_load_local_detects_modified_file() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let engine = SyncEngine::new(&NoNetwork, &cache, SyncOptions::default());
        std::fs::write(cache.json_path(), b"{}").unwrap();

        let mut state = RepodataState {
            on_disk_hash: Some(Blake2Hash::digest(b"{}").to_hex()),
            ..Default::default()
        };
        assert_eq!(engine.load_local(&state).await.unwrap(), serde_json::json!({}));

        state.on_disk_hash = Some(Blake2Hash::digest(b"[]").to_hex());
        let err = engine.load_local(&state).await.unwrap_err();
        assert!(matches!(err, SyncError::ContentMismatch { .. }));
        assert!(err.falls_back_to_full_download());
    }

    #[test]
    fn test_probation_interval_comes_from_config() {
        let dir = TempDir::new().unwrap();
        let cache = RepodataCache::new(
            dir.path().join("abcd1234"),
            CacheConfig::default().with_check_format_interval(Duration::from_secs(60)),
        );
        let engine = SyncEngine::new(&NoNetwork, &cache, SyncOptions::default());
        let state = RepodataState {
            nominal_hash: Some("ab".repeat(32)),
            has_jlap: Some(FormatCheck {
                value: false,
                last_checked: Utc::now() - chrono::Duration::minutes(2),
            }),
            ..Default::default()
        };
        assert_eq!(engine.select_strategy(&state, true), Strategy::Incremental);
    }
}
