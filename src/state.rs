//! Cross-phase run state
//!
//! The restore and save phases of a run execute as separate processes.
//! The primary key and the cache-hit flag survive between them in a
//! small key/value file whose location is injected into both phases,
//! so nothing here depends on ambient process state.

use crate::error::{CacheError, CacheResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// State key for the primary cache key recorded by the restore phase.
pub const PRIMARY_KEY: &str = "primary-key";
/// State key for the cache-hit flag.
pub const CACHE_HIT: &str = "cache-hit";

/// Whether the restore phase found a valid entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHitState {
    /// Restore phase has not recorded an outcome
    Unset,
    /// A valid entry was restored
    Hit,
    /// No valid entry existed, or the restore degraded to a miss
    Miss,
}

impl CacheHitState {
    /// Parse from a recorded label value
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("true") => Self::Hit,
            Some("false") => Self::Miss,
            _ => Self::Unset,
        }
    }

    /// Convert to a label value; `Unset` is never persisted
    pub fn as_label(&self) -> Option<&'static str> {
        match self {
            Self::Unset => None,
            Self::Hit => Some("true"),
            Self::Miss => Some("false"),
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

/// File-backed key/value store shared by the two phases of a run
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> CacheResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| CacheError::io(format!("reading state file {}", self.path.display()), e))?;

        let map: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(map)
    }

    /// Read a single state entry
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.read_map().await?.get(key).cloned())
    }

    /// Write a single state entry
    pub async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| CacheError::DirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(&map)?;
        fs::write(&self.path, content)
            .await
            .map_err(|e| CacheError::StatePersist(format!("{}: {e}", self.path.display())))?;

        debug!(key, path = %self.path.display(), "State entry written");
        Ok(())
    }

    /// Read the recorded cache-hit outcome
    pub async fn cache_hit(&self) -> CacheResult<CacheHitState> {
        let label = self.get(CACHE_HIT).await?;
        Ok(CacheHitState::from_label(label.as_deref()))
    }

    /// Record the cache-hit outcome of the restore phase
    pub async fn set_cache_hit(&self, hit: bool) -> CacheResult<()> {
        let state = if hit {
            CacheHitState::Hit
        } else {
            CacheHitState::Miss
        };
        // as_label is Some for both persisted variants
        if let Some(label) = state.as_label() {
            self.set(CACHE_HIT, label).await?;
        }
        Ok(())
    }
}

/// Default state file location when the caller injects none
pub fn default_state_file() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blobcache")
        .join("state.json")
}
