//! DeChat CLI - main entry point

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use dechat_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(&cli)?;

    // Initialize logging
    setup_logging(config.cli.verbose);
    info!(
        "Using {}",
        cli.config.as_deref().unwrap_or("default configuration")
    );

    // Execute the command
    CommandDispatcher::execute(cli, config)
        .await
        .context("Command execution failed")?;

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration: defaults, config file, environment, then CLI flags
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    AppConfig::load_with_overrides(
        cli.config.as_deref().map(Path::new),
        cli.verbose.then_some(true),
        cli.data_dir.as_deref().map(PathBuf::from),
    )
    .with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config.as_deref().unwrap_or("defaults")
        )
    })
}
