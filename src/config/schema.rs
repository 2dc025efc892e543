//! Configuration schema for blobcache
//!
//! Configuration is stored at `~/.config/blobcache/config.toml`,
//! optionally overlaid by a project-local `.blobcache.toml`.

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Remote store defaults
    pub store: StoreDefaults,

    /// Cache capture defaults
    pub cache: CacheDefaults,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Environment variable gating the run; the phases no-op with a
    /// warning when it is absent or empty
    pub ref_var: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            ref_var: "GITHUB_REF".to_string(),
        }
    }
}

/// Remote store defaults, overridable per invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreDefaults {
    /// Storage container name
    pub container: Option<String>,

    /// Blob service URL for the default-identity binding
    pub url: Option<String>,

    /// Managed identity client id
    pub client_id: Option<String>,
}

/// Cache capture defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefaults {
    /// Path patterns captured when the save phase gets no --path
    pub paths: Vec<String>,
}

impl Config {
    /// Overlay a project-local config on top of this one.
    ///
    /// Local values win wherever they are present.
    pub fn merge_local(&mut self, local: Config) {
        if !local.general.ref_var.is_empty()
            && local.general.ref_var != GeneralConfig::default().ref_var
        {
            self.general.ref_var = local.general.ref_var;
        }
        if local.store.container.is_some() {
            self.store.container = local.store.container;
        }
        if local.store.url.is_some() {
            self.store.url = local.store.url;
        }
        if local.store.client_id.is_some() {
            self.store.client_id = local.store.client_id;
        }
        if !local.cache.paths.is_empty() {
            self.cache.paths = local.cache.paths;
        }
    }
}
