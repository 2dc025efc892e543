//! Remote blob store abstraction
//!
//! Provides a capability trait for the remote object store and a
//! factory that selects between the two bindings: a named-container
//! binding driven by an explicit connection string, and a
//! default-identity binding driven by the ambient credential plus a
//! service URL. Callers depend only on the trait.

pub mod azure;
pub mod credentials;

pub use azure::AzureBlobStore;

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use tracing::info;

/// A stream of payload chunks flowing to or from the remote store
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Abstract remote object store interface
///
/// One entry per cache key: an opaque byte payload plus string
/// metadata. Only the pipeline interprets the metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether an entry exists for `key`
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Read the metadata map of an existing entry
    async fn get_metadata(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Replace the metadata map of an existing entry
    async fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> CacheResult<()>;

    /// Delete the entry if present; absent entries are not an error
    async fn delete_if_exists(&self, key: &str) -> CacheResult<()>;

    /// Upload a payload from a byte stream, without buffering it whole
    async fn upload_stream(&self, key: &str, body: ByteStream) -> CacheResult<()>;

    /// Stream the payload of an existing entry
    async fn download_stream(&self, key: &str) -> CacheResult<ByteStream>;
}

/// Store connection settings assembled from CLI flags and config
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Connection string; non-empty selects the named-container binding
    pub connection_string: Option<String>,
    /// Container name, required by both bindings
    pub container: String,
    /// Blob service URL for the default-identity binding
    pub url: Option<String>,
    /// Managed identity client id for the default-identity binding
    pub client_id: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Connect to the configured container.
///
/// Selects the binding by whether a connection string is supplied,
/// then verifies that the container exists.
pub async fn connect(config: &StoreConfig) -> CacheResult<Box<dyn BlobStore>> {
    if config.container.trim().is_empty() {
        return Err(CacheError::MissingInput("container"));
    }

    let store = match non_empty(config.connection_string.as_deref()) {
        Some(conn) => {
            info!("Connecting to storage account container: {}", config.container);
            AzureBlobStore::from_connection_string(conn, &config.container)?
        }
        None => {
            let url = non_empty(config.url.as_deref()).ok_or(CacheError::MissingInput("url"))?;
            info!("Connecting to storage account container: {}", config.container);
            AzureBlobStore::with_default_credential(
                url,
                &config.container,
                config.client_id.as_deref(),
            )
            .await?
        }
    };

    if !store
        .container_exists()
        .await
        .map_err(|e| CacheError::StoreConnect(e.to_string()))?
    {
        return Err(CacheError::ContainerNotFound(config.container.clone()));
    }

    Ok(Box::new(store))
}
