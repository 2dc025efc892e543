//! CLI command implementations

pub mod restore;
pub mod save;

pub use restore::execute as restore;
pub use save::execute as save;

use crate::cli::args::StoreArgs;
use crate::config::Config;
use crate::error::CacheResult;
use crate::store::StoreConfig;
use tracing::warn;

/// Check the run-gating environment variable.
///
/// Runs not tied to a ref are skipped with a warning rather than
/// failed, so the surrounding job keeps working.
pub(crate) fn ref_present(ref_var: &str) -> bool {
    if std::env::var(ref_var).map(|v| !v.is_empty()).unwrap_or(false) {
        return true;
    }
    warn!("Event not supported because it's not tied to a ref ({ref_var} is unset)");
    false
}

/// Assemble store settings: CLI flags win over config file defaults.
pub(crate) fn build_store_config(args: &StoreArgs, config: &Config) -> StoreConfig {
    StoreConfig {
        connection_string: args.connection_string.clone(),
        container: args
            .container
            .clone()
            .or_else(|| config.store.container.clone())
            .unwrap_or_default(),
        url: args.url.clone().or_else(|| config.store.url.clone()),
        client_id: args
            .client_id
            .clone()
            .or_else(|| config.store.client_id.clone()),
    }
}

/// Publish an output value for downstream steps.
///
/// Appends `name=value` to the file named by GITHUB_OUTPUT when the
/// runner provides one, and always echoes the pair on stdout.
pub(crate) async fn set_output(name: &str, value: &str) -> CacheResult<()> {
    if let Ok(path) = std::env::var("GITHUB_OUTPUT") {
        if !path.is_empty() {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| crate::error::CacheError::io("opening output file", e))?;
            file.write_all(format!("{name}={value}\n").as_bytes())
                .await
                .map_err(|e| crate::error::CacheError::io("writing output file", e))?;
        }
    }
    println!("{name}={value}");
    Ok(())
}
