//! Error types for blobcache
//!
//! All modules use `CacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for blobcache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in blobcache
#[derive(Error, Debug)]
pub enum CacheError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create directory {path}: {source}")]
    DirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Required input missing: {0}")]
    MissingInput(&'static str),

    #[error("Cache key must not be empty")]
    EmptyKey,

    #[error("Cache not found for input keys: {0}")]
    CacheMiss(String),

    // Store errors
    #[error("Unable to connect to container: {0}")]
    StoreConnect(String),

    #[error("Container '{0}' does not exist.")]
    ContainerNotFound(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Azure not authenticated. Run: az login")]
    AzureNotAuthenticated,

    #[error("Azure credential error: {0}")]
    AzureCredential(String),

    #[error("Blob store request failed: {context}: {source}")]
    StoreRequest {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Blob store returned {status} for {context}")]
    StoreStatus { context: String, status: u16 },

    #[error("Failed to upload '{key}': {code}")]
    Upload { key: String, code: String },

    #[error("Failed to download '{key}': {code}")]
    Download { key: String, code: String },

    // Archive errors
    #[error("Failed to spawn {command}: {source}")]
    ArchiveSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {code}")]
    ArchiveExit { command: String, code: i32 },

    #[error("Archive stream closed unexpectedly")]
    StreamClosed,

    // State errors
    #[error("Failed to persist run state: {0}")]
    StatePersist(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an archive spawn error
    pub fn archive_spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::ArchiveSpawn {
            command: command.into(),
            source,
        }
    }

    /// Create a store request error with context
    pub fn store_request(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::StoreRequest {
            context: context.into(),
            source,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AzureNotAuthenticated => Some("Run: az login"),
            Self::MissingInput("container") => {
                Some("Pass --container or set BLOBCACHE_CONTAINER")
            }
            Self::MissingInput("url") => Some(
                "Pass --url for the default-identity binding, or supply --connection-string",
            ),
            _ => None,
        }
    }
}
