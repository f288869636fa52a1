//! Shared fixtures for the upload lifecycle tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use attache_core::{AttacheConfig, BackendSettings, CacheDir, CacheSettings};
use attache_storage::StorageRegistry;
use attache_upload::{Uploader, UploadSource};

/// Local backend flagged primary, writing under `{root}/primary`.
pub fn primary_backend(root: &Path) -> BackendSettings {
    let mut settings = BackendSettings::local("disk", root, "primary");
    settings.primary = true;
    settings
}

/// Uploader over the given backends with its cache under `{root}/uploads`.
pub async fn uploader_with(root: &Path, connections: Vec<BackendSettings>) -> Uploader {
    let mut config = AttacheConfig::new(connections);
    config.cache = CacheSettings {
        local_root: root.to_path_buf(),
        directory: "uploads".to_string(),
        max_age_secs: 3600,
    };
    let registry = Arc::new(StorageRegistry::open(&config).await.unwrap());
    let cache_dir = CacheDir::open(root, "uploads").await.unwrap();
    Uploader::new(registry, cache_dir)
}

pub fn note_source() -> UploadSource {
    UploadSource::Text {
        filename: "note.txt".to_string(),
        body: "ten bytes!".to_string(),
    }
}

/// Where a local backend stored a key, for direct filesystem assertions.
pub fn backend_file(root: &Path, directory: &str, key: &str) -> PathBuf {
    root.join(directory).join(key)
}
