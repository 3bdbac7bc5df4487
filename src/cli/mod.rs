//! Command-line interface components
//!
//! This module contains CLI-specific code for repodata_sync: argument
//! parsing and the command handlers.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, GlobalArgs, StatusArgs, SyncArgs, VerifyJlapArgs};
pub use commands::{handle_config, handle_status, handle_sync, handle_verify_jlap};
