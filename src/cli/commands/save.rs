//! Save command - second phase of a run
//!
//! Reads the primary key recorded by the restore phase and uploads the
//! resolved files when that phase missed. Cache population is
//! best-effort: everything past the ref gate degrades to a warning so
//! a failed save never fails the surrounding job.

use crate::cli::args::SaveArgs;
use crate::cli::commands::{build_store_config, ref_present};
use crate::config::Config;
use crate::error::CacheResult;
use crate::paths;
use crate::pipeline::CachePipeline;
use crate::state::{self, StateStore};
use crate::store;
use tracing::{info, warn};

/// Execute the save command
pub async fn execute(args: SaveArgs, config: &Config, state: &StateStore) -> CacheResult<()> {
    if !ref_present(&config.general.ref_var) {
        return Ok(());
    }

    if let Err(e) = save_inner(args, config, state).await {
        warn!("[warning]{e}");
    }
    Ok(())
}

async fn save_inner(args: SaveArgs, config: &Config, state: &StateStore) -> CacheResult<()> {
    // Inputs are re-evaluated between phases; the key recorded at
    // restore time is authoritative.
    let Some(key) = state.get(state::PRIMARY_KEY).await? else {
        warn!("Error retrieving key from state.");
        return Ok(());
    };

    if state.cache_hit().await?.is_hit() {
        info!("Cache hit occurred on the primary key {key}, not saving cache.");
        return Ok(());
    }

    let patterns = collect_patterns(&args, config);
    if patterns.is_empty() {
        return Err(crate::error::CacheError::MissingInput("path"));
    }

    let files = paths::resolve(&patterns);
    info!("Caching {key} with {} files", files.len());

    let store_config = build_store_config(&args.store, config);
    let store = store::connect(&store_config).await?;
    let pipeline = CachePipeline::new(store);

    pipeline.save(&key, &files).await?;
    info!("Cache saved with key: {key}");
    Ok(())
}

fn collect_patterns(args: &SaveArgs, config: &Config) -> Vec<String> {
    let from_args: Vec<String> = args
        .path
        .as_deref()
        .unwrap_or_default()
        .split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if !from_args.is_empty() {
        return from_args;
    }
    config.cache.paths.clone()
}
