//! blobcache - Remote artifact cache for CI pipelines
//!
//! CLI entry point that dispatches to the restore and save phases.

use blobcache::cli::{Cli, Commands};
use blobcache::config::ConfigManager;
use blobcache::error::CacheResult;
use blobcache::state::{self, StateStore};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("blobcache=warn"),
        1 => EnvFilter::new("blobcache=info"),
        _ => EnvFilter::new("blobcache=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| blobcache::error::CacheError::io("getting current directory", e))?;
        let found = ConfigManager::find_local_config(&cwd);
        if let Some(ref path) = found {
            debug!("Found local config: {}", path.display());
        }
        found
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    let state_file = cli
        .state_file
        .clone()
        .unwrap_or_else(state::default_state_file);
    let state = StateStore::new(state_file);

    // Dispatch to command
    match cli.command {
        Commands::Restore(args) => blobcache::cli::commands::restore(args, &config, &state).await,
        Commands::Save(args) => blobcache::cli::commands::save(args, &config, &state).await,
    }
}
