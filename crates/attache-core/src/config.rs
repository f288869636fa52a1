//! Configuration module
//!
//! Named backend connections plus the cache-store settings. The configuration
//! is built once at startup and handed to `StorageRegistry::open`; nothing in
//! the workspace reads ambient global state.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CACHE_BACKEND_NAME, DEFAULT_CACHE_DIRECTORY, DEFAULT_CACHE_MAX_AGE_SECS, PRIMARY_BACKEND_ALIAS,
};

/// Storage provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    S3,
    Swift,
}

impl FromStr for StorageProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageProvider::Local),
            "s3" => Ok(StorageProvider::S3),
            "swift" => Ok(StorageProvider::Swift),
            _ => Err(anyhow::anyhow!("Invalid storage provider: {}", s)),
        }
    }
}

impl Display for StorageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageProvider::Local => write!(f, "local"),
            StorageProvider::S3 => write!(f, "s3"),
            StorageProvider::Swift => write!(f, "swift"),
        }
    }
}

/// One named backend connection.
///
/// `directory` is the container for the provider: a bucket for S3, a Swift
/// container, or a subdirectory under `local_root` for the local provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub name: String,
    pub provider: StorageProvider,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub default_when_blank: bool,
    /// Store objects with public-read access where the provider supports it.
    #[serde(default)]
    pub public: bool,
    pub directory: String,
    /// Base URL used to build public URLs for stored objects.
    #[serde(default)]
    pub portal_url: Option<String>,
    // Local provider
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    // S3-compatible providers
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    // Swift-compatible providers
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
}

impl BackendSettings {
    /// Minimal local backend settings, used by tests and the cache store.
    pub fn local(name: &str, root: impl Into<PathBuf>, directory: &str) -> Self {
        BackendSettings {
            name: name.to_string(),
            provider: StorageProvider::Local,
            primary: false,
            default_when_blank: false,
            public: false,
            directory: directory.to_string(),
            portal_url: None,
            local_root: Some(root.into()),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            auth_url: None,
            username: None,
            password: None,
            tenant: None,
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.name.trim().is_empty() {
            anyhow::bail!("backend name must not be empty");
        }
        if self.directory.trim().is_empty() {
            anyhow::bail!("backend {}: directory must not be empty", self.name);
        }
        match self.provider {
            StorageProvider::Local => {
                if self.local_root.is_none() {
                    anyhow::bail!("backend {}: local provider requires local_root", self.name);
                }
            }
            StorageProvider::S3 => {
                if self.region.is_none() && self.endpoint.is_none() {
                    anyhow::bail!(
                        "backend {}: s3 provider requires region or endpoint",
                        self.name
                    );
                }
            }
            StorageProvider::Swift => {
                if self.auth_url.is_none() || self.username.is_none() || self.password.is_none() {
                    anyhow::bail!(
                        "backend {}: swift provider requires auth_url, username and password",
                        self.name
                    );
                }
            }
        }
        Ok(())
    }
}

fn default_cache_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_cache_directory() -> String {
    DEFAULT_CACHE_DIRECTORY.to_string()
}

fn default_cache_max_age() -> u64 {
    DEFAULT_CACHE_MAX_AGE_SECS
}

/// Settings for the ephemeral cache store and scratch directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_root")]
    pub local_root: PathBuf,
    #[serde(default = "default_cache_directory")]
    pub directory: String,
    /// Scratch files older than this are removed by `CacheDir::clean`.
    #[serde(default = "default_cache_max_age")]
    pub max_age_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            local_root: default_cache_root(),
            directory: default_cache_directory(),
            max_age_secs: default_cache_max_age(),
        }
    }
}

/// Application configuration: named backend connections plus cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttacheConfig {
    pub connections: Vec<BackendSettings>,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl AttacheConfig {
    pub fn new(connections: Vec<BackendSettings>) -> Self {
        AttacheConfig {
            connections,
            cache: CacheSettings::default(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, anyhow::Error> {
        let config: AttacheConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.connections.is_empty() {
            anyhow::bail!("at least one backend connection must be configured");
        }
        let mut seen = std::collections::HashSet::new();
        for settings in &self.connections {
            settings.validate()?;
            if settings.name == CACHE_BACKEND_NAME || settings.name == PRIMARY_BACKEND_ALIAS {
                anyhow::bail!("backend name {} is reserved", settings.name);
            }
            if !seen.insert(settings.name.as_str()) {
                anyhow::bail!("duplicate backend name: {}", settings.name);
            }
        }
        if self.connections.iter().filter(|c| c.primary).count() > 1 {
            anyhow::bail!("at most one backend may be marked primary");
        }
        if self
            .connections
            .iter()
            .filter(|c| c.default_when_blank)
            .count()
            > 1
        {
            anyhow::bail!("at most one backend may be marked default_when_blank");
        }
        Ok(())
    }
}
