//! Configuration management for repodata_sync
//!
//! This module provides unified configuration management with multi-source
//! loading and zero-config defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{CacheConfig, ClientConfig, RepoInterfaceKind, SyncConfig};
use crate::constants::{env, files, http, limits, lock, repodata, state};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Cache location and locking
    pub cache: CacheConfigToml,
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Freshness and transport format settings
    pub sync: SyncConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache directory path
    pub cache_root: Option<PathBuf>,
    /// Lock attempts before giving up
    pub lock_attempts: u32,
    /// Sleep between lock attempts in milliseconds
    pub lock_retry_interval_ms: u64,
    /// Skip file locking
    pub no_lock: bool,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            cache_root: None,
            lock_attempts: lock::ATTEMPTS,
            lock_retry_interval_ms: lock::RETRY_INTERVAL.as_millis() as u64,
            no_lock: false,
        }
    }
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfigToml {
    /// TCP keep-alive timeout in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum connections per host
    pub pool_max_per_host: usize,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds
    pub read_timeout_secs: u64,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            read_timeout_secs: http::READ_TIMEOUT.as_secs(),
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

/// TOML-friendly sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfigToml {
    /// 0 = always revalidate, 1 = honour Cache-Control, N = N seconds
    pub local_repodata_ttl: u64,
    /// Document name inside each channel subdirectory
    pub repodata_fn: String,
    /// Transport formats to use: plain, zstd or jlap
    pub interface: RepoInterfaceKind,
    /// Seconds before an unsupported format is checked again
    pub check_format_interval_secs: u64,
    /// Never touch the network
    pub offline: bool,
    /// Serve cached repodata regardless of staleness
    pub use_index_cache: bool,
}

impl Default for SyncConfigToml {
    fn default() -> Self {
        Self {
            local_repodata_ttl: repodata::DEFAULT_LOCAL_TTL,
            repodata_fn: repodata::REPODATA_FN.to_string(),
            interface: RepoInterfaceKind::default(),
            check_format_interval_secs: state::CHECK_FORMAT_INTERVAL.as_secs(),
            offline: false,
            use_index_cache: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            colored_output: true,
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (CacheConfig, ClientConfig, SyncConfig) {
        let mut cache = self.cache.to_runtime_config();
        cache.local_repodata_ttl = self.sync.local_repodata_ttl;
        cache.check_format_interval = Duration::from_secs(self.sync.check_format_interval_secs);
        (
            cache,
            self.client.to_runtime_config(),
            self.sync.to_runtime_config(),
        )
    }

    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit, then project-local, then user)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound { path }),
            Some(path) => Some(path),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) => {
                debug!("Loading config from: {}", path.display());
                Self::load_from_file(&path).await?
            }
            None => Self::default(),
        };

        if let Ok(cache_dir) = std::env::var(env::CACHE_DIR) {
            if !cache_dir.is_empty() {
                debug!("Cache root overridden by {}", env::CACHE_DIR);
                config.cache.cache_root = Some(PathBuf::from(cache_dir));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.client.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client.rate_limit_rps".to_string(),
                value: "0".to_string(),
                reason: "Rate limit must be non-zero".to_string(),
            });
        }
        if self.cache.lock_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.lock_attempts".to_string(),
                value: "0".to_string(),
                reason: "At least one lock attempt is required".to_string(),
            });
        }
        if self.sync.repodata_fn.is_empty() || self.sync.repodata_fn.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "sync.repodata_fn".to_string(),
                value: self.sync.repodata_fn.clone(),
                reason: "Expected a bare file name such as repodata.json".to_string(),
            });
        }
        Ok(())
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(".").join(files::LOCAL_CONFIG_FILE)];
        if let Some(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        let found = search_paths.into_iter().find(|path| path.exists());
        match &found {
            Some(path) => debug!("Found config file: {}", path.display()),
            None => debug!("No config file found in standard locations"),
        }
        found
    }

    /// Default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(files::APP_DIR).join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        let default_cache_path = CacheConfig::default().resolve_cache_root();

        format!(
            r#"# repodata-sync configuration
# Copy to ./{local} or {user} and adjust as needed.

[cache]
# Cache directory (default: {cache})
# cache_root = "/path/to/custom/cache"

# File lock retry budget
lock_attempts = {lock_attempts}
lock_retry_interval_ms = {lock_interval}

# Disable locking (unsafe with concurrent processes)
no_lock = false

[client]
tcp_keepalive_secs = 30
tcp_nodelay = true
pool_idle_timeout_secs = {pool_idle}
pool_max_per_host = {pool_max}
request_timeout_secs = {request_timeout}
connect_timeout_secs = {connect_timeout}
read_timeout_secs = {read_timeout}
rate_limit_rps = {rps}

[sync]
# 0 = always revalidate, 1 = honour Cache-Control max-age, N = seconds
local_repodata_ttl = {ttl}
repodata_fn = "{repodata_fn}"
# plain, zstd or jlap
interface = "jlap"
# How long an unsupported .json.zst / .jlap is not retried (seconds)
check_format_interval_secs = {interval}
offline = false
use_index_cache = false

[logging]
level = "warn"  # error, warn, info, debug, trace
colored_output = true
"#,
            local = files::LOCAL_CONFIG_FILE,
            user = Self::default_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "the user config directory".to_string()),
            cache = default_cache_path.display(),
            lock_attempts = lock::ATTEMPTS,
            lock_interval = lock::RETRY_INTERVAL.as_millis(),
            pool_idle = http::POOL_IDLE_TIMEOUT.as_secs(),
            pool_max = http::POOL_MAX_PER_HOST,
            request_timeout = http::DEFAULT_TIMEOUT.as_secs(),
            connect_timeout = http::CONNECT_TIMEOUT.as_secs(),
            read_timeout = http::READ_TIMEOUT.as_secs(),
            rps = limits::DEFAULT_RATE_LIMIT_RPS,
            ttl = repodata::DEFAULT_LOCAL_TTL,
            repodata_fn = repodata::REPODATA_FN,
            interval = state::CHECK_FORMAT_INTERVAL.as_secs(),
        )
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheConfig
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            cache_root: self.cache_root.clone(),
            lock_attempts: self.lock_attempts,
            lock_retry_interval: Duration::from_millis(self.lock_retry_interval_ms),
            no_lock: self.no_lock,
            ..Default::default()
        }
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_keepalive: self.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            rate_limit_rps: self.rate_limit_rps,
            ..Default::default()
        }
    }
}

impl SyncConfigToml {
    /// Convert to runtime SyncConfig
    pub fn to_runtime_config(&self) -> SyncConfig {
        SyncConfig {
            repodata_fn: self.repodata_fn.clone(),
            interface: self.interface,
            offline: self.offline,
            use_index_cache: self.use_index_cache,
            force_full: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_creation() {
        let config = AppConfig::default();

        assert_eq!(config.client.rate_limit_rps, limits::DEFAULT_RATE_LIMIT_RPS);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.sync.local_repodata_ttl, 1);
        assert_eq!(config.sync.interface, RepoInterfaceKind::Jlap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_generation() {
        let content = AppConfig::generate_default_config_content();

        // Should be valid TOML that matches the built-in defaults
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, AppConfig::default());
        assert!(content.contains("[cache]"));
        assert!(content.contains("[sync]"));
    }

    #[tokio::test]
    async fn test_config_loading_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        // Should fail when explicitly specified
        let result = AppConfig::load(Some(config_path)).await;
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_config_loading_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let test_config = r#"
[cache]
no_lock = true

[client]
rate_limit_rps = 15

[sync]
local_repodata_ttl = 600
interface = "zstd"
check_format_interval_secs = 3600

[logging]
level = "debug"
"#;
        tokio::fs::write(&config_path, test_config).await.unwrap();

        let config = AppConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.client.rate_limit_rps, 15);
        assert_eq!(config.logging.level, "debug");
        // Unspecified values keep their defaults
        assert_eq!(config.client.connect_timeout_secs, http::CONNECT_TIMEOUT.as_secs());
        assert_eq!(config.sync.repodata_fn, "repodata.json");

        let (cache, client, sync) = config.to_runtime_config();
        assert!(cache.no_lock);
        assert_eq!(cache.local_repodata_ttl, 600);
        assert_eq!(cache.check_format_interval, Duration::from_secs(3600));
        assert_eq!(client.rate_limit_rps, 15);
        assert_eq!(sync.interface, RepoInterfaceKind::Zstd);
    }

    #[tokio::test]
    async fn test_invalid_toml_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        tokio::fs::write(&config_path, "[sync]\ninterface = \"ftp\"\n")
            .await
            .unwrap();

        let result = AppConfig::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.client.rate_limit_rps = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.sync.repodata_fn = "nested/repodata.json".to_string();
        assert!(config.validate().is_err());
    }
}
