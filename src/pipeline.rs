//! Pack/unpack pipeline
//!
//! Orchestrates the archive codec and the blob store with two-phase
//! validity marking. An entry is observable as valid only strictly
//! after its payload is fully committed: the `valid` metadata write is
//! ordered after both the compressor exit and the transport success.
//! Anything not marked `valid=true` is a miss, never a restore source.

use crate::archive::ArchiveCodec;
use crate::error::{CacheError, CacheResult};
use crate::store::BlobStore;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Metadata field marking a fully committed entry
pub const VALID_METADATA_KEY: &str = "valid";

/// Cache entry pipeline over a remote blob store
pub struct CachePipeline {
    store: Box<dyn BlobStore>,
    codec: ArchiveCodec,
    destination_root: PathBuf,
}

impl CachePipeline {
    pub fn new(store: Box<dyn BlobStore>) -> Self {
        Self {
            store,
            codec: ArchiveCodec::new(),
            destination_root: PathBuf::from("/"),
        }
    }

    /// Replace the archive codec (tests, alternate tar binaries)
    pub fn with_codec(mut self, codec: ArchiveCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Extract relative archive members under a different root
    pub fn with_destination_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.destination_root = root.into();
        self
    }

    /// Restore the entry for `key`.
    ///
    /// Returns `Ok(false)` when no restorable entry exists (absent,
    /// or present but not marked valid). A failure while an entry was
    /// restorable is an error, so callers can tell "no cache" apart
    /// from "cache exists but restore failed".
    pub async fn restore(&self, key: &str) -> CacheResult<bool> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        if !self.store.exists(key).await? {
            return Ok(false);
        }

        let metadata = self.store.get_metadata(key).await?;
        if metadata.get(VALID_METADATA_KEY).map(String::as_str) != Some("true") {
            debug!(key, "Entry exists but is not marked valid, treating as miss");
            return Ok(false);
        }

        info!("Downloading cache for: {key}");
        let payload = self.store.download_stream(key).await?;
        self.codec.unpack(payload, &self.destination_root).await?;

        Ok(true)
    }

    /// Capture `files` and upload them under `key`.
    ///
    /// The previous entry is deleted first; compression and transfer
    /// run concurrently, and the first failure wins. `valid=true` is
    /// written only after both report success, so an interrupted save
    /// leaves the entry observable as a miss.
    pub async fn save(&self, key: &str, files: &[PathBuf]) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        debug!(key, "Deleting any existing entry");
        self.store.delete_if_exists(key).await?;

        debug!(key, files = files.len(), "Starting compression");
        let (payload, completion) = self.codec.pack(files).await?;
        tokio::try_join!(self.store.upload_stream(key, payload), completion.wait())?;

        debug!(key, "Upload completed, marking as valid");
        let metadata = HashMap::from([(VALID_METADATA_KEY.to_string(), "true".to_string())]);
        self.store.set_metadata(key, metadata).await?;

        Ok(())
    }
}
