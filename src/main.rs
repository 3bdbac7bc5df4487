//! repodata_sync CLI application
//!
//! Command-line interface for keeping conda repodata caches current.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use repodata_sync::cli::{
    handle_config, handle_status, handle_sync, handle_verify_jlap, Cli, Commands,
};
use repodata_sync::config::{AppConfig, LoggingConfig};
use repodata_sync::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error ({}): {}", e.category(), e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // Config errors are reported by the command itself
    let logging = AppConfig::load(cli.global.config.clone())
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(&cli, &logging);

    info!("repodata-sync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync(args) => {
            info!("Executing sync command");
            handle_sync(&cli.global, args).await
        }
        Commands::Status(args) => {
            info!("Executing status command");
            handle_status(&cli.global, args).await
        }
        Commands::VerifyJlap(args) => {
            info!("Executing verify-jlap command");
            handle_verify_jlap(args).await
        }
        Commands::Config => handle_config(),
    }
}

/// Initialize logging from CLI verbosity, else the configured level
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let global = &cli.global;
    let log_level = if global.quiet || global.verbose || global.very_verbose {
        cli.log_level().to_string().to_lowercase()
    } else {
        logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("repodata_sync={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(logging.colored_output)
        .with_level(global.very_verbose) // Show levels only in very verbose mode
        .with_writer(std::io::stderr)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
