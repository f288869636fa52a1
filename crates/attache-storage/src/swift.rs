//! OpenStack-Swift-compatible storage backend.
//!
//! Talks to the Swift object API over HTTP. Keystone v2 or v3 password
//! authentication is chosen from the auth URL; the token is cached and
//! refreshed shortly before it expires.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OnceCell, RwLock};

use attache_core::{BackendSettings, StorageProvider};

use crate::keys::validate_key;
use crate::traits::{ByteChunks, Storage, StorageError, StorageObject, StorageResult};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const OBJECT_META_PREFIX: &str = "x-object-meta-";
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;
const HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
struct SwiftToken {
    value: String,
    storage_url: String,
    expires_at: DateTime<Utc>,
}

impl SwiftToken {
    fn is_valid(&self) -> bool {
        (self.expires_at - Utc::now()).num_seconds() > TOKEN_EXPIRY_SLACK_SECS
    }
}

/// Swift storage implementation.
pub struct SwiftStorage {
    name: String,
    http: reqwest::Client,
    auth_url: String,
    username: String,
    password: String,
    tenant: Option<String>,
    container: String,
    portal_url: Option<String>,
    public: bool,
    primary: bool,
    default_when_blank: bool,
    token: RwLock<Option<SwiftToken>>,
    container_ready: Arc<OnceCell<()>>,
}

impl SwiftStorage {
    pub fn open(settings: &BackendSettings) -> StorageResult<Self> {
        let auth_url = settings.auth_url.clone().ok_or_else(|| {
            StorageError::Config(format!(
                "backend {}: swift provider requires auth_url",
                settings.name
            ))
        })?;
        let username = settings.username.clone().ok_or_else(|| {
            StorageError::Config(format!(
                "backend {}: swift provider requires username",
                settings.name
            ))
        })?;
        let password = settings.password.clone().ok_or_else(|| {
            StorageError::Config(format!(
                "backend {}: swift provider requires password",
                settings.name
            ))
        })?;

        if !auth_url.contains("/v3") && !auth_url.contains("/v2") {
            return Err(StorageError::Config(format!(
                "backend {}: cannot determine identity version from auth_url {}",
                settings.name, auth_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(SwiftStorage {
            name: settings.name.clone(),
            http,
            auth_url,
            username,
            password,
            tenant: settings.tenant.clone(),
            container: settings.directory.clone(),
            portal_url: settings.portal_url.clone(),
            public: settings.public,
            primary: settings.primary,
            default_when_blank: settings.default_when_blank,
            token: RwLock::new(None),
            container_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_token(&self) -> StorageResult<SwiftToken> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_valid() {
                return Ok(token.clone());
            }
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            if token.is_valid() {
                return Ok(token.clone());
            }
        }

        let token = if self.auth_url.contains("/v3") {
            self.authenticate_v3().await?
        } else {
            self.authenticate_v2().await?
        };
        tracing::info!(backend = %self.name, expires_at = %token.expires_at, "swift token refreshed");
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn authenticate_v3(&self) -> StorageResult<SwiftToken> {
        let url = format!("{}/auth/tokens", self.auth_url.trim_end_matches('/'));
        let mut auth = serde_json::json!({
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": self.username,
                        "domain": {"id": "default"},
                        "password": self.password,
                    }
                }
            }
        });
        if let Some(tenant) = &self.tenant {
            auth["scope"] = serde_json::json!({
                "project": {"name": tenant, "domain": {"id": "default"}}
            });
        }

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "auth": auth }))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "swift authentication failed with status {}",
                response.status()
            )));
        }

        let value = response
            .headers()
            .get("x-subject-token")
            .and_then(|header| header.to_str().ok())
            .map(String::from)
            .ok_or_else(|| StorageError::Backend("missing x-subject-token header".to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let storage_url = body["token"]["catalog"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|service| service["type"] == "object-store")
            .and_then(|service| service["endpoints"].as_array())
            .into_iter()
            .flatten()
            .find(|endpoint| endpoint["interface"] == "public")
            .and_then(|endpoint| endpoint["url"].as_str())
            .map(String::from)
            .ok_or_else(|| {
                StorageError::Backend("no public object-store endpoint in catalog".to_string())
            })?;

        let expires_at = parse_expiry(body["token"]["expires_at"].as_str());

        Ok(SwiftToken {
            value,
            storage_url,
            expires_at,
        })
    }

    async fn authenticate_v2(&self) -> StorageResult<SwiftToken> {
        let url = format!("{}/tokens", self.auth_url.trim_end_matches('/'));
        let mut auth = serde_json::json!({
            "passwordCredentials": {
                "username": self.username,
                "password": self.password,
            }
        });
        if let Some(tenant) = &self.tenant {
            auth["tenantName"] = serde_json::json!(tenant);
        }

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "auth": auth }))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "swift authentication failed with status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let value = body["access"]["token"]["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| StorageError::Backend("missing token id".to_string()))?;

        let storage_url = body["access"]["serviceCatalog"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|service| service["type"] == "object-store")
            .and_then(|service| service["endpoints"].as_array())
            .and_then(|endpoints| endpoints.first())
            .and_then(|endpoint| endpoint["publicURL"].as_str())
            .map(String::from)
            .ok_or_else(|| {
                StorageError::Backend("no object-store endpoint in catalog".to_string())
            })?;

        let expires_at = parse_expiry(body["access"]["token"]["expires"].as_str());

        Ok(SwiftToken {
            value,
            storage_url,
            expires_at,
        })
    }

    fn container_url(&self, token: &SwiftToken) -> String {
        format!(
            "{}/{}",
            token.storage_url.trim_end_matches('/'),
            self.container
        )
    }

    fn object_url(&self, token: &SwiftToken, key: &str) -> String {
        format!("{}/{}", self.container_url(token), key)
    }

    /// One-time container creation, memoized for the backend's lifetime.
    /// A public backend gets a world-readable container ACL.
    async fn ensure_container(&self, token: &SwiftToken) -> StorageResult<()> {
        self.container_ready
            .get_or_try_init(|| async {
                let mut request = self
                    .http
                    .put(self.container_url(token))
                    .header(AUTH_TOKEN_HEADER, &token.value);
                if self.public {
                    request = request.header("X-Container-Read", ".r:*");
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(StorageError::Backend(format!(
                        "failed to create container {} with status {}",
                        self.container,
                        response.status()
                    )));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

fn parse_expiry(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1))
}

#[async_trait]
impl Storage for SwiftStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::Swift
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
            // Without a portal URL the best public address is the storage
            // endpoint itself, which requires a valid token to resolve; fall
            // back to the container-relative form.
            None => format!("{}/{}", self.container, key),
        }
    }

    async fn store(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        _public: bool,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let token = self.ensure_token().await?;
        self.ensure_container(&token).await?;

        let size = data.len();
        let response = self
            .http
            .put(self.object_url(&token, key))
            .header(AUTH_TOKEN_HEADER, &token.value)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::StoreFailed(e.to_string()))?;

        if !response.status().is_success() {
            tracing::error!(
                backend = %self.name,
                container = %self.container,
                key = %key,
                status = %response.status(),
                "swift store failed"
            );
            return Err(StorageError::StoreFailed(format!(
                "status {}",
                response.status()
            )));
        }

        tracing::info!(
            backend = %self.name,
            container = %self.container,
            key = %key,
            size_bytes = size,
            "swift store successful"
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Box<dyn StorageObject>>> {
        validate_key(key)?;
        let token = self.ensure_token().await?;
        let url = self.object_url(&token, key);

        let response = self
            .http
            .head(&url)
            .header(AUTH_TOKEN_HEADER, &token.value)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "swift head failed with status {}",
                response.status()
            )));
        }

        let headers = response.headers();
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        let metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                name.as_str()
                    .strip_prefix(OBJECT_META_PREFIX)
                    .zip(value.to_str().ok())
                    .map(|(meta_key, v)| (meta_key.to_string(), v.to_string()))
            })
            .collect();

        Ok(Some(Box::new(SwiftObject {
            http: self.http.clone(),
            url,
            token: token.value,
            size,
            content_type,
            etag,
            metadata,
        })))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let token = self.ensure_token().await?;

        let response = self
            .http
            .delete(self.object_url(&token, key))
            .header(AUTH_TOKEN_HEADER, &token.value)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::DeleteFailed(format!(
                "status {}",
                response.status()
            )));
        }

        tracing::info!(backend = %self.name, container = %self.container, key = %key, "swift delete successful");

        Ok(())
    }

    async fn rename(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> StorageResult<Box<dyn StorageObject>> {
        validate_key(old_key)?;
        validate_key(new_key)?;
        let token = self.ensure_token().await?;

        // Server-side copy, then delete the source.
        let response = self
            .http
            .put(self.object_url(&token, new_key))
            .header(AUTH_TOKEN_HEADER, &token.value)
            .header("X-Copy-From", format!("/{}/{}", self.container, old_key))
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| StorageError::RenameFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::RenameFailed(format!(
                "copy failed with status {}",
                response.status()
            )));
        }

        let response = self
            .http
            .delete(self.object_url(&token, old_key))
            .header(AUTH_TOKEN_HEADER, &token.value)
            .send()
            .await
            .map_err(|e| StorageError::RenameFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::RenameFailed(format!(
                "source delete failed with status {}",
                response.status()
            )));
        }

        tracing::info!(
            backend = %self.name,
            container = %self.container,
            old_key = %old_key,
            new_key = %new_key,
            "swift rename successful"
        );

        self.get(new_key).await?.ok_or_else(|| {
            StorageError::RenameFailed(format!("renamed object missing: {}", new_key))
        })
    }
}

/// Handle to one object in a Swift container.
pub struct SwiftObject {
    http: reqwest::Client,
    url: String,
    token: String,
    size: Option<u64>,
    content_type: Option<String>,
    etag: Option<String>,
    metadata: HashMap<String, String>,
}

impl SwiftObject {
    async fn fetch(&self) -> StorageResult<reqwest::Response> {
        let response = self
            .http
            .get(&self.url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::DownloadFailed(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl StorageObject for SwiftObject {
    async fn read(&self) -> StorageResult<Vec<u8>> {
        let response = self.fetch().await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn stream(&self) -> StorageResult<ByteChunks> {
        let response = self.fetch().await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn download(&self, to: &Path) -> StorageResult<()> {
        let response = self.fetch().await?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(to).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}
