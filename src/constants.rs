//! Application constants for repodata_sync
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides the cache root directory
    pub const CACHE_DIR: &str = "REPODATA_SYNC_CACHE_DIR";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("repodata-sync/", env!("CARGO_PKG_VERSION"));

    /// Overall request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum idle time between body reads
    pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// Request headers
    pub const RANGE: &str = "range";
    pub const IF_NONE_MATCH: &str = "if-none-match";
    pub const IF_MODIFIED_SINCE: &str = "if-modified-since";
    pub const ACCEPT_ENCODING: &str = "accept-encoding";

    /// Response headers kept alongside the JLAP state
    pub const STORE_HEADERS: &[&str] = &[
        "etag",
        "last-modified",
        "cache-control",
        "content-range",
        "content-length",
        "date",
        "content-type",
        "content-encoding",
    ];
}

/// Rate limiting and retry configuration
pub mod limits {
    /// Default rate limit (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;

    /// Maximum retry attempts for 429/503 and connection failures
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
}

/// JLAP log format constants
pub mod jlap {
    /// Digest size of both the chain checksum and the content hash
    pub const DIGEST_SIZE: usize = 32;

    /// Seed used when no IV is known yet
    pub const DEFAULT_IV: [u8; DIGEST_SIZE] = [0u8; DIGEST_SIZE];

    /// Footer key naming the hash the log converges to
    pub const LATEST: &str = "latest";

    /// Sibling resource extensions
    pub const JLAP_EXT: &str = ".jlap";
    pub const ZST_EXT: &str = ".json.zst";
}

/// Cache state file keys and layout
pub mod state {
    use super::Duration;

    pub const URL_KEY: &str = "_url";
    pub const ETAG_KEY: &str = "_etag";
    pub const LAST_MODIFIED_KEY: &str = "_mod";
    pub const CACHE_CONTROL_KEY: &str = "_cache_control";
    pub const NOMINAL_HASH_KEY: &str = "blake2_256_nominal";
    pub const ON_DISK_HASH_KEY: &str = "blake2_256";
    pub const JLAP_KEY: &str = "jlap";
    pub const MTIME_KEY: &str = "mtime_ns";
    pub const SIZE_KEY: &str = "size";
    pub const REFRESH_KEY: &str = "refresh_ns";

    /// Unprefixed spellings written by older releases
    pub const LEGACY_ALIASES: &[(&str, &str)] = &[
        ("url", URL_KEY),
        ("etag", ETAG_KEY),
        ("mod", LAST_MODIFIED_KEY),
        ("cache_control", CACHE_CONTROL_KEY),
    ];

    /// How long a negative capability flag suppresses re-probing
    pub const CHECK_FORMAT_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// File suffixes sharing one base path
    pub const JSON_SUFFIX: &str = ".json";
    pub const STATE_SUFFIX: &str = ".state.json";
    pub const LOCK_SUFFIX: &str = ".lock";
    pub const JLAP_SUFFIX: &str = ".jlap";
}

/// File lock retry policy
pub mod lock {
    use super::Duration;

    /// Attempts before giving up
    pub const ATTEMPTS: u32 = 10;

    /// Sleep between attempts
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);
}

/// File handling constants
pub mod files {
    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Output buffer for streaming zstd decompression
    pub const DECOMPRESS_BUFFER_SIZE: usize = 128 * 1024;

    /// Default configuration file name in the working directory
    pub const LOCAL_CONFIG_FILE: &str = "repodata-sync.toml";

    /// Application directory name under the user's config/cache dirs
    pub const APP_DIR: &str = "repodata-sync";
}

/// Repodata defaults
pub mod repodata {
    /// Default document name inside a channel subdirectory
    pub const REPODATA_FN: &str = "repodata.json";

    /// Default local TTL: honour the server's Cache-Control max-age
    pub const DEFAULT_LOCAL_TTL: u64 = 1;
}

// Re-export commonly used constants at the top level for convenience
pub use http::USER_AGENT;
pub use jlap::DIGEST_SIZE;
pub use repodata::REPODATA_FN;
