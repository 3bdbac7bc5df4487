//! repodata_sync library
//!
//! Keeps local copies of conda channel `repodata.json` documents current.
//! Updates travel as hash-chained JLAP patch logs when a channel offers them,
//! with zstd-compressed and plain JSON downloads as fallbacks.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
