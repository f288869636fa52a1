//! Store retry behavior against a backend that always fails.

mod helpers;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use attache_core::{BackendSettings, CacheDir, StorageProvider};
use attache_storage::{
    LocalStorage, Storage, StorageError, StorageObject, StorageRegistry, StorageResult,
};
use attache_upload::{Uploader, UploadState};
use helpers::note_source;

/// Backend whose writes always fail.
struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    fn name(&self) -> &str {
        "flaky"
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }

    fn is_primary(&self) -> bool {
        true
    }

    fn is_default_when_blank(&self) -> bool {
        false
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://flaky.example.com/{}", key)
    }

    async fn store(
        &self,
        _key: &str,
        _data: Vec<u8>,
        _content_type: &str,
        _public: bool,
    ) -> StorageResult<()> {
        Err(StorageError::StoreFailed("injected failure".to_string()))
    }

    async fn get(&self, _key: &str) -> StorageResult<Option<Box<dyn StorageObject>>> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn rename(
        &self,
        _old_key: &str,
        new_key: &str,
    ) -> StorageResult<Box<dyn StorageObject>> {
        Err(StorageError::RenameFailed(new_key.to_string()))
    }
}

async fn failing_uploader(root: &Path) -> Uploader {
    let cache_backend = LocalStorage::open(&BackendSettings::local("cache", root, "uploads"))
        .await
        .unwrap();
    let registry = StorageRegistry::from_backends(
        vec![Arc::new(FailingStorage)],
        Arc::new(cache_backend),
    );
    let cache_dir = CacheDir::open(root, "uploads").await.unwrap();
    Uploader::new(Arc::new(registry), cache_dir)
}

#[tokio::test]
async fn test_store_retries_then_errors() {
    let dir = tempdir().unwrap();
    let uploader = failing_uploader(dir.path()).await;

    let upload = uploader.ingest(note_source()).await.unwrap();

    assert_eq!(upload.state, UploadState::Error);
    // One diagnostic per attempt, exactly the retry ceiling.
    assert_eq!(upload.error_log.len(), attache_upload::STORE_ATTEMPTS);
    assert!(upload
        .error_log
        .iter()
        .all(|entry| entry.starts_with("STORE: ")));

    // Nothing was stored and the cache file survives for a later retry.
    assert!(upload.path("original").is_none());
    let cache_path = upload.cache_path("original").unwrap();
    assert!(cache_path.exists());
}

#[tokio::test]
async fn test_store_attempt_ceiling_is_configurable() {
    let dir = tempdir().unwrap();
    let uploader = failing_uploader(dir.path()).await.with_store_attempts(5);

    let upload = uploader.ingest(note_source()).await.unwrap();

    assert_eq!(upload.state, UploadState::Error);
    assert_eq!(upload.error_log.len(), 5);
}
