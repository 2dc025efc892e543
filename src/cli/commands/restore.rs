//! Restore command - first phase of a run
//!
//! Records the primary key for the save phase, then attempts to
//! restore a valid entry. A miss is informational; a failed restore of
//! an existing entry degrades to a miss with a warning. Only
//! --fail-on-miss escalates either outcome.

use crate::cli::args::RestoreArgs;
use crate::cli::commands::{build_store_config, ref_present, set_output};
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::pipeline::CachePipeline;
use crate::state::{self, StateStore};
use crate::store;
use tracing::{info, warn};

/// Execute the restore command
pub async fn execute(args: RestoreArgs, config: &Config, state: &StateStore) -> CacheResult<()> {
    if !ref_present(&config.general.ref_var) {
        return Ok(());
    }

    if args.key.trim().is_empty() {
        return Err(CacheError::MissingInput("key"));
    }

    state.set(state::PRIMARY_KEY, &args.key).await?;

    let store_config = build_store_config(&args.store, config);
    let store = store::connect(&store_config).await?;
    let pipeline = CachePipeline::new(store);

    match pipeline.restore(&args.key).await {
        Ok(true) => {
            state.set_cache_hit(true).await?;
            set_output("cache-hit", "true").await?;
            info!("Cache restored from key: {}", args.key);
            Ok(())
        }
        Ok(false) => {
            state.set_cache_hit(false).await?;
            set_output("cache-hit", "false").await?;
            info!("Cache not found for input keys: {}", args.key);
            if args.fail_on_miss {
                return Err(CacheError::CacheMiss(args.key));
            }
            Ok(())
        }
        Err(e) => {
            // The entry existed but could not be restored; the run
            // proceeds without a cache unless the caller escalates.
            state.set_cache_hit(false).await?;
            set_output("cache-hit", "false").await?;
            warn!("[warning]{e}");
            if args.fail_on_miss {
                return Err(e);
            }
            Ok(())
        }
    }
}
