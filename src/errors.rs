//! Error types for repodata_sync
//!
//! Each component owns an error enum. The engine folds them into [`SyncError`],
//! which knows which failures fall back to a full download and which are
//! surfaced to the caller. [`AppError`] is the umbrella used by the binary.

use std::path::PathBuf;
use thiserror::Error;

/// Download and HTTP transport errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while streaming a body to disk
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect or read timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Server answered with an error status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Server answered a range request with a status other than 206 or 304
    #[error("Unexpected HTTP {status} for range request to {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Server responded with HTTP 429")]
    RateLimitExceeded,

    /// Server overloaded
    #[error("Server overloaded. Server responded with HTTP 503")]
    ServerOverloaded,

    /// Maximum retries exceeded
    #[error("Maximum retry attempts ({max_retries}) exceeded for {url}")]
    MaxRetriesExceeded { url: String, max_retries: u32 },

    /// Compressed body could not be decoded
    #[error("Could not decompress {url}: {reason}")]
    Decompress { url: String, reason: String },
}

impl DownloadError {
    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::Status { status, .. } | DownloadError::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            DownloadError::RateLimitExceeded => Some(429),
            DownloadError::ServerOverloaded => Some(503),
            DownloadError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// A 4xx answer other than 416, meaning the resource or feature is absent
    pub fn is_client_error(&self) -> bool {
        matches!(self, DownloadError::Status { status, .. } if (400..500).contains(status) && *status != 416)
    }

    /// Timeouts, connection failures and 5xx answers
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Timeout { .. }
            | DownloadError::Http(_)
            | DownloadError::RateLimitExceeded
            | DownloadError::ServerOverloaded
            | DownloadError::MaxRetriesExceeded { .. }
            | DownloadError::UnexpectedStatus { .. } => true,
            DownloadError::Status { status, .. } => *status >= 500 || *status == 416,
            DownloadError::Decompress { .. } => true,
            DownloadError::Io(_) | DownloadError::InvalidUrl { .. } => false,
        }
    }
}

/// JLAP log codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Trailing checksum does not match the running chain
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },

    /// Not enough lines to check the trailing checksum or locate the footer
    #[error("JLAP log too short: {lines} line(s)")]
    TooShort { lines: usize },

    /// A line handed to `append` contains a newline
    #[error("JLAP line must not contain a newline")]
    InvalidInput,

    /// A line is not valid UTF-8
    #[error("JLAP line at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: u64 },

    /// Invalid hex digest
    #[error("Invalid hash format: {value}. Expected 64 hex characters")]
    InvalidHex { value: String },

    /// Footer or patch line that is not the expected JSON
    #[error("Malformed JLAP line: {reason}")]
    MalformedLine { reason: String },
}

/// Patch selection and application errors
#[derive(Error, Debug)]
pub enum PatchError {
    /// The local hash is not reachable from the log's latest hash
    #[error("No patch chain leads from {have} to {want}")]
    NotFound { have: String, want: String },

    /// A patch record is not valid JSON of the expected shape
    #[error("Malformed patch record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// RFC 6902 application failed
    #[error("Failed to apply patch {from} -> {to}: {reason}")]
    Apply {
        from: String,
        to: String,
        reason: String,
    },
}

/// Cache management errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// I/O error on the data or state file
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State file cannot be trusted; only ever logged, never returned from load
    #[error("Corrupt cache state {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    /// State serialisation failed
    #[error("Failed to serialise cache state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Atomic rename failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },
}

/// Advisory file lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock still held by someone else after every attempt
    #[error("Could not lock {path} after {attempts} attempts")]
    Timeout { path: PathBuf, attempts: u32 },

    /// Lock file could not be opened or locked
    #[error("Lock I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Synchronisation engine errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// JLAP log could not be parsed or verified
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Patches could not be selected or applied
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Cache files could not be read or written
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Lock acquisition failed
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Local document is not valid JSON
    #[error("Cached repodata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Local document bytes do not hash to the recorded value
    #[error("Cached repodata hash mismatch. Expected: {expected}, got: {actual}")]
    ContentMismatch { expected: String, actual: String },

    /// Server does not offer a `.jlap` resource
    #[error("JLAP not available at {url} (HTTP {status})")]
    JlapUnavailable { url: String, status: u16 },
}

impl SyncError {
    /// Whether a failed attempt may be retried once as a full download
    pub fn falls_back_to_full_download(&self) -> bool {
        match self {
            SyncError::Download(e) => e.is_transient() || e.is_client_error(),
            SyncError::Codec(_)
            | SyncError::Patch(_)
            | SyncError::Json(_)
            | SyncError::ContentMismatch { .. }
            | SyncError::JlapUnavailable { .. } => true,
            SyncError::Cache(_) | SyncError::Lock(_) => false,
        }
    }

    /// Whether repeating a failed full download could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Download(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Synchronisation error
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Codec error
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Lock error
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Sync(e) => e.is_transient(),
            AppError::Download(e) => e.is_transient(),
            AppError::Lock(LockError::Timeout { .. }) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Sync(SyncError::Lock(_)) | AppError::Lock(_) => "lock",
            AppError::Sync(SyncError::Download(_)) | AppError::Download(_) => "network",
            AppError::Sync(_) => "sync",
            AppError::Codec(_) => "codec",
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Codec result type alias
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Patch result type alias
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Lock result type alias
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Sync result type alias
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Config result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_excludes_416() {
        let not_found = DownloadError::Status {
            url: "https://example.com/repodata.jlap".into(),
            status: 404,
        };
        let range = DownloadError::Status {
            url: "https://example.com/repodata.jlap".into(),
            status: 416,
        };
        assert!(not_found.is_client_error());
        assert!(!not_found.is_transient());
        assert!(!range.is_client_error());
        assert!(range.is_transient());
    }

    #[test]
    fn test_fallback_ladder() {
        let codec = SyncError::Codec(CodecError::TooShort { lines: 1 });
        assert!(codec.falls_back_to_full_download());
        assert!(!codec.is_transient());

        let lock = SyncError::Lock(LockError::Timeout {
            path: PathBuf::from("x.lock"),
            attempts: 10,
        });
        assert!(!lock.falls_back_to_full_download());

        let server = SyncError::Download(DownloadError::Status {
            url: "https://example.com/repodata.json".into(),
            status: 502,
        });
        assert!(server.falls_back_to_full_download());
        assert!(server.is_transient());
    }

    #[test]
    fn test_error_categories() {
        let app: AppError = SyncError::Lock(LockError::Timeout {
            path: PathBuf::from("x.lock"),
            attempts: 1,
        })
        .into();
        assert_eq!(app.category(), "lock");
        assert!(!app.is_recoverable());

        let app: AppError = CodecError::InvalidInput.into();
        assert_eq!(app.category(), "codec");
    }
}
