//! Storage abstraction traits
//!
//! This module defines the `Storage` trait implemented once per provider and
//! the `StorageObject` handle returned by `get`.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use attache_core::StorageProvider;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store failed: {0}")]
    StoreFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("rename failed: {0}")]
    RenameFailed(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Ordered stream of body chunks; each chunk is delivered exactly once.
pub type ByteChunks = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Read-only handle to one stored object.
///
/// Attribute accessors may legitimately return `None` on providers that do
/// not report them; absence is not an error.
#[async_trait]
pub trait StorageObject: Send + Sync {
    /// Full-body fetch.
    async fn read(&self) -> StorageResult<Vec<u8>>;

    /// Chunked fetch for large objects.
    async fn stream(&self) -> StorageResult<ByteChunks>;

    /// Write the body to a local file, truncating any existing file.
    async fn download(&self, to: &Path) -> StorageResult<()> {
        let data = self.read().await?;
        tokio::fs::write(to, data).await?;
        Ok(())
    }

    fn size(&self) -> Option<u64>;
    fn content_type(&self) -> Option<&str>;
    fn etag(&self) -> Option<&str>;
    fn metadata(&self) -> &HashMap<String, String>;
}

/// Uniform capability surface implemented once per provider.
///
/// Backends are constructed from [`attache_core::BackendSettings`] by the
/// registry and never reconfigured afterwards. Missing containers (bucket,
/// Swift container, local directory) are created lazily on first store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Configured backend name, unique within the registry.
    fn name(&self) -> &str;

    fn provider(&self) -> StorageProvider;

    fn is_primary(&self) -> bool;

    fn is_default_when_blank(&self) -> bool;

    /// Public URL for an object at `key`, built from the configured portal
    /// URL or a provider-specific fallback format.
    fn public_url(&self, key: &str) -> String;

    /// Write `data` under `key`, overwriting any existing object. `public`
    /// requests public-read access on top of the backend's configuration.
    async fn store(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> StorageResult<()>;

    /// Handle to the object at `key`, or `None` when it does not exist.
    /// Absence is never an error.
    async fn get(&self, key: &str) -> StorageResult<Option<Box<dyn StorageObject>>>;

    /// Remove the object at `key`. Failures the provider reports surface as
    /// `DeleteFailed`; providers that cannot distinguish a missing key treat
    /// the delete as successful.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Move an object, preserving the configured public-read setting.
    /// Object stores implement this as copy + delete.
    async fn rename(&self, old_key: &str, new_key: &str)
        -> StorageResult<Box<dyn StorageObject>>;

    /// Convenience: fetch `key` into a local file.
    async fn download(&self, key: &str, to: &Path) -> StorageResult<()> {
        match self.get(key).await? {
            Some(object) => object.download(to).await,
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    /// Convenience: full body of the object at `key`.
    async fn value(&self, key: &str) -> StorageResult<Vec<u8>> {
        match self.get(key).await? {
            Some(object) => object.read().await,
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }
}
