//! Named registry of configured storage backends.
//!
//! Built exactly once from [`AttacheConfig`] and immutable for the process
//! lifetime; the backend map is read-only after construction and safe for
//! concurrent use from any number of uploads.

use std::collections::HashMap;
use std::sync::Arc;

use attache_core::constants::{CACHE_BACKEND_NAME, PRIMARY_BACKEND_ALIAS};
use attache_core::{AttacheConfig, BackendSettings, StorageProvider};

use crate::local::LocalStorage;
use crate::traits::{Storage, StorageError, StorageResult};

pub struct StorageRegistry {
    backends: Vec<Arc<dyn Storage>>,
    by_name: HashMap<String, usize>,
    cache: Arc<dyn Storage>,
}

impl StorageRegistry {
    /// Build every configured backend plus the dedicated cache store.
    pub async fn open(config: &AttacheConfig) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut backends: Vec<Arc<dyn Storage>> = Vec::with_capacity(config.connections.len());
        for settings in &config.connections {
            backends.push(Self::build(settings).await?);
        }

        let cache_settings = BackendSettings::local(
            CACHE_BACKEND_NAME,
            config.cache.local_root.clone(),
            &config.cache.directory,
        );
        let cache: Arc<dyn Storage> = Arc::new(LocalStorage::open(&cache_settings).await?);

        Ok(Self::assemble(backends, cache))
    }

    /// Assemble a registry from already-built backends. Useful for tests and
    /// for applications with backend implementations of their own.
    pub fn from_backends(
        backends: Vec<Arc<dyn Storage>>,
        cache: Arc<dyn Storage>,
    ) -> Self {
        Self::assemble(backends, cache)
    }

    fn assemble(backends: Vec<Arc<dyn Storage>>, cache: Arc<dyn Storage>) -> Self {
        let by_name = backends
            .iter()
            .enumerate()
            .map(|(index, backend)| (backend.name().to_string(), index))
            .collect();
        StorageRegistry {
            backends,
            by_name,
            cache,
        }
    }

    async fn build(settings: &BackendSettings) -> StorageResult<Arc<dyn Storage>> {
        match settings.provider {
            StorageProvider::Local => Ok(Arc::new(LocalStorage::open(settings).await?)),

            #[cfg(feature = "storage-s3")]
            StorageProvider::S3 => Ok(Arc::new(crate::s3::S3Storage::open(settings).await?)),

            #[cfg(not(feature = "storage-s3"))]
            StorageProvider::S3 => Err(StorageError::Config(format!(
                "backend {}: s3 backend not available (storage-s3 feature not enabled)",
                settings.name
            ))),

            #[cfg(feature = "storage-swift")]
            StorageProvider::Swift => Ok(Arc::new(crate::swift::SwiftStorage::open(settings)?)),

            #[cfg(not(feature = "storage-swift"))]
            StorageProvider::Swift => Err(StorageError::Config(format!(
                "backend {}: swift backend not available (storage-swift feature not enabled)",
                settings.name
            ))),
        }
    }

    /// Backend by configured name; also resolves the reserved `cache` name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Storage>> {
        if name == CACHE_BACKEND_NAME {
            return Some(self.cache.clone());
        }
        self.by_name
            .get(name)
            .map(|&index| self.backends[index].clone())
    }

    /// The primary backend: the one flagged primary, else the first
    /// configured.
    pub fn primary(&self) -> Arc<dyn Storage> {
        self.backends
            .iter()
            .find(|backend| backend.is_primary())
            .unwrap_or(&self.backends[0])
            .clone()
    }

    /// Resolve a possibly-blank backend name the way the upload lifecycle
    /// needs it: a blank name goes to the primary backend, falling back to
    /// the `default_when_blank` backend only when no primary is flagged;
    /// `primary` is accepted as an alias.
    pub fn resolve(&self, name: Option<&str>) -> StorageResult<Arc<dyn Storage>> {
        match name {
            None | Some("") => {
                if let Some(primary) = self.backends.iter().find(|b| b.is_primary()) {
                    return Ok(primary.clone());
                }
                if let Some(default) = self.backends.iter().find(|b| b.is_default_when_blank()) {
                    return Ok(default.clone());
                }
                Ok(self.backends[0].clone())
            }
            Some(PRIMARY_BACKEND_ALIAS) => Ok(self.primary()),
            Some(other) => self
                .get(other)
                .ok_or_else(|| StorageError::Config(format!("unknown backend: {}", other))),
        }
    }

    /// The dedicated ephemeral cache store.
    pub fn cache(&self) -> Arc<dyn Storage> {
        self.cache.clone()
    }

    /// Configured backend names in configuration order.
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::CacheSettings;
    use tempfile::tempdir;

    async fn registry_for(connections: Vec<BackendSettings>, root: &std::path::Path) -> StorageRegistry {
        let mut config = AttacheConfig::new(connections);
        config.cache = CacheSettings {
            local_root: root.to_path_buf(),
            directory: "uploads".to_string(),
            max_age_secs: 60,
        };
        StorageRegistry::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_primary_flag_wins() {
        let dir = tempdir().unwrap();
        let first = BackendSettings::local("first", dir.path(), "first");
        let mut second = BackendSettings::local("second", dir.path(), "second");
        second.primary = true;
        let registry = registry_for(vec![first, second], dir.path()).await;

        assert_eq!(registry.primary().name(), "second");
        assert_eq!(registry.resolve(None).unwrap().name(), "second");
        assert_eq!(registry.resolve(Some("primary")).unwrap().name(), "second");
    }

    #[tokio::test]
    async fn test_first_backend_is_primary_fallback() {
        let dir = tempdir().unwrap();
        let first = BackendSettings::local("first", dir.path(), "first");
        let second = BackendSettings::local("second", dir.path(), "second");
        let registry = registry_for(vec![first, second], dir.path()).await;

        assert_eq!(registry.primary().name(), "first");
    }

    #[tokio::test]
    async fn test_blank_prefers_primary_over_default_when_blank() {
        let dir = tempdir().unwrap();
        let mut first = BackendSettings::local("durable", dir.path(), "durable");
        first.primary = true;
        let mut second = BackendSettings::local("fallback", dir.path(), "fallback");
        second.default_when_blank = true;
        let registry = registry_for(vec![first, second], dir.path()).await;

        assert_eq!(registry.resolve(None).unwrap().name(), "durable");
    }

    #[tokio::test]
    async fn test_blank_uses_default_when_no_primary() {
        let dir = tempdir().unwrap();
        let first = BackendSettings::local("durable", dir.path(), "durable");
        let mut second = BackendSettings::local("fallback", dir.path(), "fallback");
        second.default_when_blank = true;
        let registry = registry_for(vec![first, second], dir.path()).await;

        assert_eq!(registry.resolve(None).unwrap().name(), "fallback");
        assert_eq!(registry.resolve(Some("")).unwrap().name(), "fallback");
    }

    #[tokio::test]
    async fn test_named_lookup() {
        let dir = tempdir().unwrap();
        let first = BackendSettings::local("alpha", dir.path(), "alpha");
        let second = BackendSettings::local("beta", dir.path(), "beta");
        let registry = registry_for(vec![first, second], dir.path()).await;

        assert_eq!(registry.resolve(Some("beta")).unwrap().name(), "beta");
        assert!(matches!(
            registry.resolve(Some("gamma")),
            Err(StorageError::Config(_))
        ));
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_cache_backend_reserved_name() {
        let dir = tempdir().unwrap();
        let first = BackendSettings::local("alpha", dir.path(), "alpha");
        let registry = registry_for(vec![first], dir.path()).await;

        let cache = registry.get("cache").unwrap();
        assert_eq!(cache.name(), "cache");
        assert_eq!(registry.cache().name(), "cache");
    }
}
