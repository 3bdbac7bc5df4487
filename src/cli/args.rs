//! Command-line argument parsing for repodata_sync
//!
//! This module defines the CLI structure using clap derive macros: syncing a
//! channel's repodata, inspecting its cache entry, verifying local `.jlap`
//! files and printing a default configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::RepoInterfaceKind;

/// repodata-sync - keep conda repodata caches current
#[derive(Parser, Debug)]
#[command(
    name = "repodata_sync",
    version,
    about = "Incrementally synchronise conda channel repodata",
    long_about = "Keeps a local copy of a conda channel's repodata.json current.
Uses JLAP patch logs when the channel offers them, zstd-compressed downloads otherwise,
and falls back to plain JSON."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch the latest repodata for a channel subdirectory
    Sync(SyncArgs),

    /// Show the cache entry for a channel subdirectory
    Status(StatusArgs),

    /// Verify a local .jlap file
    VerifyJlap(VerifyJlapArgs),

    /// Print a default configuration file
    Config,
}

/// Arguments for the sync command
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Channel subdirectory URL, e.g. https://conda.anaconda.org/conda-forge/noarch
    #[arg(value_name = "URL")]
    pub url: String,

    /// Skip patching and download the whole document
    #[arg(long)]
    pub force_full: bool,

    /// Local TTL: 0 always revalidates, 1 honours Cache-Control, N is seconds
    #[arg(long, value_name = "N")]
    pub ttl: Option<u64>,

    /// Transport formats to use
    #[arg(long, value_enum)]
    pub interface: Option<RepoInterfaceKind>,

    /// Document name inside the subdirectory
    #[arg(long, value_name = "NAME")]
    pub repodata_fn: Option<String>,

    /// Serve only what is cached
    #[arg(long)]
    pub offline: bool,
}

/// Arguments for the status command
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Channel subdirectory URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// Document name inside the subdirectory
    #[arg(long, value_name = "NAME")]
    pub repodata_fn: Option<String>,
}

/// Arguments for the verify-jlap command
#[derive(Args, Debug, Clone)]
pub struct VerifyJlapArgs {
    /// Path to the .jlap file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl SyncArgs {
    /// Reject URLs that cannot name a channel subdirectory
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://")
            || self.url.starts_with("https://")
            || self.url.starts_with("file://"))
        {
            return Err(format!("Unsupported channel URL: {}", self.url));
        }
        if let Some(name) = &self.repodata_fn {
            if name.is_empty() || name.contains('/') {
                return Err(format!("Invalid repodata file name: {}", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_args(url: &str) -> SyncArgs {
        SyncArgs {
            url: url.to_string(),
            force_full: false,
            ttl: None,
            interface: None,
            repodata_fn: None,
            offline: false,
        }
    }

    #[test]
    fn test_sync_args_validation() {
        assert!(sync_args("https://conda.anaconda.org/conda-forge/noarch")
            .validate()
            .is_ok());
        assert!(sync_args("conda-forge").validate().is_err());

        let nested = SyncArgs {
            repodata_fn: Some("a/b.json".to_string()),
            ..sync_args("https://example.com/noarch")
        };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_parse_sync_command() {
        let cli = Cli::try_parse_from([
            "repodata_sync",
            "-v",
            "sync",
            "https://example.com/noarch",
            "--force-full",
            "--ttl",
            "0",
            "--interface",
            "zstd",
        ])
        .unwrap();

        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert!(args.force_full);
        assert_eq!(args.ttl, Some(0));
        assert_eq!(args.interface, Some(RepoInterfaceKind::Zstd));
        assert!(cli.global.verbose);
    }

    #[test]
    fn test_log_level() {
        let cli_quiet = Cli {
            global: GlobalArgs {
                verbose: false,
                very_verbose: false,
                quiet: true,
                config: None,
                cache_dir: None,
            },
            command: Commands::Config,
        };

        let cli_verbose = Cli {
            global: GlobalArgs {
                verbose: true,
                very_verbose: false,
                quiet: false,
                config: None,
                cache_dir: None,
            },
            command: Commands::Config,
        };

        assert_eq!(cli_quiet.log_level(), tracing::Level::ERROR);
        assert_eq!(cli_verbose.log_level(), tracing::Level::INFO);
    }
}
