//! Scratch file lifecycle
//!
//! Archive operations need short-lived files on disk (the tar file
//! list). A `ScratchFile` owns exactly one such file and guarantees a
//! release attempt on every exit path: deletion is retried a bounded
//! number of times with a fixed spacing, then abandoned with a warning.
//! A leaked scratch file must never fail the surrounding operation.

use crate::error::{CacheError, CacheResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const RELEASE_ATTEMPTS: u32 = 10;
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(500);

type RemoveFn = Box<dyn Fn(&Path) -> io::Result<()> + Send + Sync>;

fn remove_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// A temp file owned exclusively by the operation that created it.
pub struct ScratchFile {
    path: Option<PathBuf>,
    remove: RemoveFn,
    retry_delay: Duration,
}

impl ScratchFile {
    /// Create a new scratch file in the system temp directory.
    pub fn create() -> CacheResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("blobcache-")
            .tempfile()
            .map_err(|e| CacheError::io("creating scratch file", e))?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| CacheError::io("detaching scratch file", e.error))?;

        Ok(Self {
            path: Some(path),
            remove: Box::new(remove_file),
            retry_delay: RELEASE_RETRY_DELAY,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Write the full contents of the scratch file.
    pub async fn write(&self, contents: &[u8]) -> CacheResult<()> {
        tokio::fs::write(self.path(), contents)
            .await
            .map_err(|e| CacheError::io("writing scratch file", e))
    }

    /// Delete the file, retrying up to the bound. Exhaustion logs a
    /// warning and abandons the file; it never fails the caller.
    pub async fn release(mut self) {
        let Some(path) = self.path.take() else {
            return;
        };

        for attempt in 1..=RELEASE_ATTEMPTS {
            match (self.remove)(&path) {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to delete temporary file (attempt {attempt} of {RELEASE_ATTEMPTS})"
                    );
                    if attempt < RELEASE_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn with_remove(mut self, remove: RemoveFn) -> Self {
        self.remove = remove;
        self
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Drop for ScratchFile {
    // Backstop for cancelled operations; the owning path calls
    // release() explicitly.
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = (self.remove)(&path);
        }
    }
}
