//! Command handlers for the repodata_sync CLI
//!
//! This module implements the command handlers that connect CLI arguments
//! to the library: loading configuration, building the transport and cache,
//! and printing results.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::app::cache::{FormatCheck, RepodataCache};
use crate::app::fetch::LatestRepodata;
use crate::app::jlap::Jlap;
use crate::app::{HttpHandler, RepodataFetch};
use crate::cli::{GlobalArgs, StatusArgs, SyncArgs, VerifyJlapArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, LockError, Result};

/// Load configuration and apply global overrides
async fn load_config(global: &GlobalArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(global.config.clone()).await?;
    if let Some(cache_dir) = &global.cache_dir {
        config.cache.cache_root = Some(cache_dir.clone());
    }
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Handle the sync command
pub async fn handle_sync(global: &GlobalArgs, args: SyncArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;
    let config = load_config(global).await?;
    let (mut cache_config, client_config, mut sync_config) = config.to_runtime_config();

    if let Some(ttl) = args.ttl {
        cache_config.local_repodata_ttl = ttl;
    }
    if let Some(interface) = args.interface {
        sync_config.interface = interface;
    }
    if let Some(repodata_fn) = args.repodata_fn.clone() {
        sync_config.repodata_fn = repodata_fn;
    }
    sync_config.force_full = args.force_full;
    sync_config.offline |= args.offline;

    let start_time = Instant::now();
    let transport = Arc::new(HttpHandler::from_config(&client_config)?);
    let fetch = RepodataFetch::for_channel(&args.url, cache_config, transport, sync_config).await?;
    info!("Syncing {} into {}", args.url, fetch.cache().json_path().display());

    let (latest, state) = fetch.fetch_latest().await?;
    let how = match &latest {
        LatestRepodata::Parsed(_) => "patched in memory",
        LatestRepodata::OnDisk(_) => "on disk",
    };

    if !global.quiet {
        println!("📦 {}", args.url);
        println!("   Cache file: {}", fetch.cache().json_path().display());
        println!("   Result: {}", how);
        println!(
            "   Nominal hash: {}",
            state.nominal_hash.as_deref().unwrap_or("(unknown)")
        );
        println!(
            "   On-disk hash: {}",
            state.on_disk_hash.as_deref().unwrap_or("(unknown)")
        );
        println!("   Took {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}

fn describe_format(check: Option<FormatCheck>) -> String {
    match check {
        None => "unknown".to_string(),
        Some(check) => format!(
            "{} (checked {})",
            if check.value { "yes" } else { "no" },
            check.last_checked.to_rfc3339()
        ),
    }
}

/// Handle the status command
pub async fn handle_status(global: &GlobalArgs, args: StatusArgs) -> Result<()> {
    let config = load_config(global).await?;
    let (cache_config, _, sync_config) = config.to_runtime_config();
    let repodata_fn = args
        .repodata_fn
        .clone()
        .unwrap_or(sync_config.repodata_fn);

    // Read-only; a sync holding the lock must not block this
    let cache = RepodataCache::for_url(&args.url, &repodata_fn, cache_config).await?;
    let state = cache.load_state().await;
    let now = Utc::now();
    let json_path = cache.json_path();

    println!("💾 Cache Entry");
    println!("==============");
    println!("Channel: {}", args.url);
    println!("Document: {}", repodata_fn);
    println!("Location: {}", json_path.display());
    match tokio::fs::metadata(&json_path).await {
        Ok(meta) => println!(
            "Cached size: {:.1} MB",
            meta.len() as f64 / (1024.0 * 1024.0)
        ),
        Err(_) => println!("Cached size: (not cached)"),
    }
    println!("ETag: {}", state.etag.as_deref().unwrap_or("-"));
    println!("Last-Modified: {}", state.last_modified.as_deref().unwrap_or("-"));
    println!("Cache-Control: {}", state.cache_control.as_deref().unwrap_or("-"));
    println!("Nominal hash: {}", state.nominal_hash.as_deref().unwrap_or("-"));
    println!("On-disk hash: {}", state.on_disk_hash.as_deref().unwrap_or("-"));
    match state.last_checked() {
        Some(checked) => println!("Last refreshed: {}", checked.to_rfc3339()),
        None => println!("Last refreshed: never"),
    }
    println!(
        "Stale: {} (timeout {:.0}s)",
        cache.stale(&state, now),
        cache.timeout(&state, now)
    );
    println!("Has .json.zst: {}", describe_format(state.has_zst));
    println!("Has .jlap: {}", describe_format(state.has_jlap));
    if let Some(jlap) = &state.jlap {
        println!("JLAP position: {} bytes", jlap.pos);
    }
    println!("Locking: {}", describe_lock(&cache).await);
    Ok(())
}

/// Lock capability of a cache entry, without waiting for a holder
async fn describe_lock(cache: &RepodataCache) -> String {
    match cache.try_lock().await {
        Ok(lock) => format!("{:?}", lock.mode()),
        Err(LockError::Timeout { .. }) => "held by another process".to_string(),
        Err(e) => format!("unavailable ({})", e),
    }
}

/// Handle the verify-jlap command
pub async fn handle_verify_jlap(args: VerifyJlapArgs) -> Result<()> {
    let log = Jlap::from_path(&args.file, true).await??;
    let latest = log.latest()?;

    println!("✅ {} verified", args.file.display());
    println!("   Lines: {}", log.line_count());
    println!("   Patches: {}", log.body().len());
    if let Some(footer) = log.footer() {
        println!("   Footer: {}", footer.text);
    }
    println!("   Latest: {}", latest);
    Ok(())
}

/// Handle the config command
pub fn handle_config() -> Result<()> {
    print!("{}", AppConfig::generate_default_config_content());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hash::Blake2Hash;
    use crate::constants::jlap::DEFAULT_IV;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_verify_jlap_accepts_valid_log() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("repodata.jlap");

        let mut log = Jlap::new(Blake2Hash::from_bytes(DEFAULT_IV));
        log.append(json!({"latest": "ab"}).to_string()).unwrap();
        log.terminate();
        log.write(&path).await.unwrap();

        assert!(handle_verify_jlap(VerifyJlapArgs { file: path }).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_jlap_rejects_tampered_log() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("repodata.jlap");

        let mut log = Jlap::new(Blake2Hash::from_bytes(DEFAULT_IV));
        log.append(json!({"latest": "ab"}).to_string()).unwrap();
        log.terminate();
        let tampered = log.serialize().replace("\"ab\"", "\"cd\"");
        tokio::fs::write(&path, tampered).await.unwrap();

        let err = handle_verify_jlap(VerifyJlapArgs { file: path })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "codec");
    }

    #[tokio::test]
    async fn test_verify_jlap_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = handle_verify_jlap(VerifyJlapArgs {
            file: temp_dir.path().join("absent.jlap"),
        })
        .await
        .unwrap_err();
        assert_eq!(err.category(), "io");
    }

    #[tokio::test]
    async fn test_status_while_entry_is_locked() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, AppConfig::generate_default_config_content())
            .await
            .unwrap();
        let global = GlobalArgs {
            verbose: false,
            very_verbose: false,
            quiet: true,
            config: Some(config_path),
            cache_dir: Some(temp_dir.path().to_path_buf()),
        };
        let url = "https://conda.anaconda.org/conda-forge/noarch";

        let config = load_config(&global).await.unwrap();
        let (cache_config, _, sync_config) = config.to_runtime_config();
        let cache = RepodataCache::for_url(url, &sync_config.repodata_fn, cache_config)
            .await
            .unwrap();
        assert_eq!(describe_lock(&cache).await, "Exclusive");

        let held = cache.lock().await.unwrap();
        assert_eq!(describe_lock(&cache).await, "held by another process");
        let args = StatusArgs {
            url: url.to_string(),
            repodata_fn: None,
        };
        assert!(handle_status(&global, args).await.is_ok());
        drop(held);
    }
}
