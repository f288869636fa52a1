//! Local filesystem storage backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use attache_core::{content_type_for, BackendSettings, StorageProvider};

use crate::keys::validate_key;
use crate::traits::{ByteChunks, Storage, StorageError, StorageObject, StorageResult};

/// Local filesystem storage implementation.
///
/// Objects live under `{local_root}/{directory}/{key}`; parent directories
/// are created as needed on store.
#[derive(Clone)]
pub struct LocalStorage {
    name: String,
    base_path: PathBuf,
    portal_url: Option<String>,
    public: bool,
    primary: bool,
    default_when_blank: bool,
}

impl LocalStorage {
    pub async fn open(settings: &BackendSettings) -> StorageResult<Self> {
        let root = settings.local_root.clone().ok_or_else(|| {
            StorageError::Config(format!(
                "backend {}: local provider requires local_root",
                settings.name
            ))
        })?;
        let base_path = root.join(&settings.directory);

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::Config(format!(
                "failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            name: settings.name.clone(),
            base_path,
            portal_url: settings.portal_url.clone(),
            public: settings.public,
            primary: settings.primary,
            default_when_blank: settings.default_when_blank,
        })
    }

    /// Deterministic join of the configured root, container, and key.
    pub fn local_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::Local
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn is_default_when_blank(&self) -> bool {
        self.default_when_blank
    }

    fn public_url(&self, key: &str) -> String {
        match &self.portal_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("file://{}", self.base_path.join(key).display()),
        }
    }

    async fn store(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
        _public: bool,
    ) -> StorageResult<()> {
        let path = self.local_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::StoreFailed(format!("failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::StoreFailed(format!("failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::StoreFailed(format!("failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            backend = %self.name,
            key = %key,
            size_bytes = size,
            "local store successful"
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Box<dyn StorageObject>>> {
        let path = self.local_path(key)?;

        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };

        let modified_secs = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Some(Box::new(LocalObject {
            path,
            size: meta.len(),
            content_type: content_type_for(key),
            etag: format!("{:x}-{:x}", meta.len(), modified_secs),
            metadata: HashMap::new(),
        })))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.local_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(backend = %self.name, key = %key, "local delete successful");

        Ok(())
    }

    async fn rename(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> StorageResult<Box<dyn StorageObject>> {
        let from = self.local_path(old_key)?;
        let to = self.local_path(new_key)?;

        self.ensure_parent_dir(&to).await?;

        fs::rename(&from, &to).await.map_err(|e| {
            StorageError::RenameFailed(format!(
                "failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;

        tracing::info!(
            backend = %self.name,
            old_key = %old_key,
            new_key = %new_key,
            "local rename successful"
        );

        self.get(new_key)
            .await?
            .ok_or_else(|| StorageError::RenameFailed(format!("renamed object missing: {}", new_key)))
    }
}

/// Handle to one file under a local backend.
pub struct LocalObject {
    path: PathBuf,
    size: u64,
    content_type: String,
    etag: String,
    metadata: HashMap<String, String>,
}

#[async_trait]
impl StorageObject for LocalObject {
    async fn read(&self) -> StorageResult<Vec<u8>> {
        let data = fs::read(&self.path).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "failed to read file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(data)
    }

    async fn stream(&self) -> StorageResult<ByteChunks> {
        let file = fs::File::open(&self.path).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "failed to open file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let reader = tokio_util::io::ReaderStream::new(file);
        let stream = reader.map(|chunk| {
            chunk.map_err(|e| StorageError::DownloadFailed(format!("failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn download(&self, to: &Path) -> StorageResult<()> {
        fs::copy(&self.path, to).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "failed to copy {} to {}: {}",
                self.path.display(),
                to.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn content_type(&self) -> Option<&str> {
        Some(&self.content_type)
    }

    fn etag(&self) -> Option<&str> {
        Some(&self.etag)
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn test_storage(dir: &Path) -> LocalStorage {
        LocalStorage::open(&BackendSettings::local("disk", dir, "files"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        storage
            .store("original/note.txt", b"ten bytes!".to_vec(), "text/plain", false)
            .await
            .unwrap();

        let object = storage.get("original/note.txt").await.unwrap().unwrap();
        assert_eq!(object.size(), Some(10));
        assert_eq!(object.content_type(), Some("text/plain"));
        assert_eq!(object.read().await.unwrap(), b"ten bytes!");

        assert!(storage.get("original/missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        storage
            .store("deep/nested/key.bin", vec![1, 2, 3], "application/octet-stream", false)
            .await
            .unwrap();

        let path = storage.local_path("deep/nested/key.bin").unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        assert!(storage.delete("nope/missing.bin").await.is_ok());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        assert!(matches!(
            storage.get("../../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.delete("/etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        storage
            .store("thumb/old.jpg", b"jpeg".to_vec(), "image/jpeg", false)
            .await
            .unwrap();

        let renamed = storage.rename("thumb/old.jpg", "thumb/new.jpg").await.unwrap();
        assert_eq!(renamed.size(), Some(4));
        assert!(storage.get("thumb/old.jpg").await.unwrap().is_none());
        assert!(storage.get("thumb/new.jpg").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_download_and_value() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        storage
            .store("original/a.txt", b"content".to_vec(), "text/plain", false)
            .await
            .unwrap();

        assert_eq!(storage.value("original/a.txt").await.unwrap(), b"content");

        let target = dir.path().join("downloaded.txt");
        storage.download("original/a.txt", &target).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"content");

        assert!(matches!(
            storage.value("original/gone.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_chunks_in_order() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let data: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        storage
            .store("big/blob.bin", data.clone(), "application/octet-stream", false)
            .await
            .unwrap();

        let object = storage.get("big/blob.bin").await.unwrap().unwrap();
        let mut stream = object.stream().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn test_public_url() {
        let dir = tempdir().unwrap();
        let mut settings = BackendSettings::local("disk", dir.path(), "files");
        settings.portal_url = Some("https://cdn.example.com/".to_string());
        let storage = LocalStorage::open(&settings).await.unwrap();

        assert_eq!(
            storage.public_url("original/a.txt"),
            "https://cdn.example.com/original/a.txt"
        );
    }
}
