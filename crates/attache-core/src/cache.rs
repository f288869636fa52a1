//! Cache-directory manager.
//!
//! Scratch files live under `{root}/{directory}` with random,
//! collision-resistant names that preserve the original extension. The
//! directory is shared with the registry's cache backend so cached files can
//! be addressed as storage keys while they wait to be stored.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(String),
}

/// Writable scratch directory for not-yet-stored upload bytes.
#[derive(Debug, Clone)]
pub struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    /// Open (and create if missing) the scratch directory at `{root}/{directory}`.
    pub async fn open(root: impl Into<PathBuf>, directory: &str) -> Result<Self, CacheError> {
        let path = root.into().join(directory);
        fs::create_dir_all(&path).await?;
        Ok(CacheDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Random cache file name preserving the given extension (with dot, may
    /// be empty).
    pub fn generate_cache_name(&self, ext: &str) -> String {
        format!("{}{}", Uuid::new_v4().simple(), ext)
    }

    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Fresh, randomly named path for a file with the given extension.
    pub fn new_cache_file(&self, ext: &str) -> PathBuf {
        self.cache_path(&self.generate_cache_name(ext))
    }

    pub async fn save_bytes(&self, name: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.cache_path(name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(path)
    }

    pub async fn write_str(&self, name: &str, body: &str) -> Result<PathBuf, CacheError> {
        self.save_bytes(name, body.as_bytes()).await
    }

    pub async fn copy_into(&self, name: &str, source: &Path) -> Result<PathBuf, CacheError> {
        let path = self.cache_path(name);
        fs::copy(source, &path).await?;
        Ok(path)
    }

    /// Download a remote URL into the cache.
    pub async fn download_into(&self, name: &str, url: &str) -> Result<PathBuf, CacheError> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| CacheError::Download(e.to_string()))?
            .error_for_status()
            .map_err(|e| CacheError::Download(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::Download(e.to_string()))?;
        self.save_bytes(name, &body).await
    }

    /// Delete scratch files older than `max_age`. Best effort: unreadable or
    /// undeletable entries are logged and skipped. Returns the number of
    /// files removed.
    pub async fn clean(&self, max_age: Duration) -> Result<usize, CacheError> {
        tracing::info!(path = %self.path.display(), "cleaning cache directory");
        let mut removed = 0usize;
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
            if age.is_some_and(|age| age > max_age) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        tracing::info!(file = %entry.path().display(), "deleted cached file");
                        removed += 1;
                    }
                    Err(error) => {
                        tracing::warn!(file = %entry.path().display(), %error, "failed to delete cached file");
                    }
                }
            }
        }
        tracing::info!(removed, "cache cleaning done");
        Ok(removed)
    }
}
