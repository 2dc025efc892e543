//! Streaming archive codec
//!
//! Wraps the external `tar` tool with zstd compression. Bytes flow
//! between the subprocess and the caller through a bounded channel, so
//! archives of any size stream through without being materialized in
//! memory or on disk. The tool's exit code is the sole success signal;
//! its stderr is inherited for diagnostics.

use crate::error::{CacheError, CacheResult};
use crate::scratch::ScratchFile;
use crate::store::ByteStream;
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Bounded buffer between the compressor and the transport
const CHANNEL_CAPACITY: usize = 16;
const READ_CHUNK: usize = 64 * 1024;

/// Archive codec shelling out to tar with zstd compression
pub struct ArchiveCodec {
    program: String,
}

impl ArchiveCodec {
    pub fn new() -> Self {
        Self {
            program: "tar".to_string(),
        }
    }

    /// Use a different archiver binary (gtar, or a stub in tests)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Compress `files` into a byte stream.
    ///
    /// Paths are archived as given, so absolute paths restore to their
    /// original locations. Returns the stream plus a completion handle
    /// that reaps the subprocess; the upload and the completion should
    /// be joined so that neither success signal is lost.
    pub async fn pack(&self, files: &[PathBuf]) -> CacheResult<(ByteStream, PackCompletion)> {
        let list = ScratchFile::create()?;
        let mut manifest = String::new();
        for file in files {
            manifest.push_str(&file.to_string_lossy());
            manifest.push('\n');
        }
        list.write(manifest.as_bytes()).await?;

        debug!(program = %self.program, files = files.len(), "Spawning compressor");

        let mut child = Command::new(&self.program)
            .args(["-cf", "-", "--zstd", "-P"])
            .arg(format!("--files-from={}", list.path().display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CacheError::archive_spawn(format!("{} -cf", self.program), e))?;

        let Some(mut stdout) = child.stdout.take() else {
            list.release().await;
            return Err(CacheError::StreamClosed);
        };

        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(CHANNEL_CAPACITY);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            // Receiver dropped, abandon the pipe.
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let stream: ByteStream = Box::pin(ReceiverStream::new(rx));
        let completion = PackCompletion {
            command: format!("{} -cf", self.program),
            child,
            reader,
            list,
        };
        Ok((stream, completion))
    }

    /// Extract a compressed archive stream under `destination_root`.
    ///
    /// Existing files at the same paths are overwritten. A non-zero
    /// exit is surfaced even when bytes were already written; partial
    /// extraction is a failure, never a silent success.
    pub async fn unpack(&self, mut stream: ByteStream, destination_root: &Path) -> CacheResult<()> {
        debug!(program = %self.program, root = %destination_root.display(), "Spawning extractor");

        let mut child = Command::new(&self.program)
            .args(["-xf", "-", "--zstd", "-P", "-C"])
            .arg(destination_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CacheError::archive_spawn(format!("{} -xf", self.program), e))?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(CacheError::StreamClosed);
        };

        // The feed owns stdin so the pipe closes (and the extractor
        // sees EOF) as soon as it finishes, on success or failure.
        let feed = async move {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(FeedError::Source)?;
                stdin.write_all(&chunk).await.map_err(FeedError::Sink)?;
            }
            stdin.shutdown().await.map_err(FeedError::Sink)?;
            Ok::<(), FeedError>(())
        };
        let feed_result = feed.await;

        let status = child
            .wait()
            .await
            .map_err(|e| CacheError::io("waiting for extractor", e))?;

        match feed_result {
            // A broken source stream is a transport failure regardless
            // of what the extractor made of the truncated input.
            Err(FeedError::Source(e)) => Err(CacheError::io("reading download stream", e)),
            Err(FeedError::Sink(e)) if status.success() => {
                Err(CacheError::io("writing to extractor stdin", e))
            }
            _ if !status.success() => Err(CacheError::ArchiveExit {
                command: format!("{} -xf", self.program),
                code: status.code().unwrap_or(-1),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for ArchiveCodec {
    fn default() -> Self {
        Self::new()
    }
}

enum FeedError {
    Source(std::io::Error),
    Sink(std::io::Error),
}

/// Completion handle for a running compressor
pub struct PackCompletion {
    command: String,
    child: Child,
    reader: JoinHandle<()>,
    list: ScratchFile,
}

impl PackCompletion {
    /// Reap the compressor and release the scratch file list.
    ///
    /// The scratch file is released on every exit path; a non-zero
    /// exit surfaces after cleanup.
    pub async fn wait(mut self) -> CacheResult<()> {
        let status = self.child.wait().await;
        let _ = self.reader.await;
        self.list.release().await;

        let status = status.map_err(|e| CacheError::io("waiting for compressor", e))?;
        if !status.success() {
            return Err(CacheError::ArchiveExit {
                command: self.command,
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}
