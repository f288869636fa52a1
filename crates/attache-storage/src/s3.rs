//! S3-compatible storage backend.
//!
//! Works against AWS S3 and S3-compatible providers (MinIO, Ceph RGW,
//! DigitalOcean Spaces) via a custom endpoint with path-style addressing.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use futures::StreamExt;
use tokio::sync::OnceCell;

use attache_core::{BackendSettings, StorageProvider};

use crate::keys::validate_key;
use crate::traits::{ByteChunks, Storage, StorageError, StorageObject, StorageResult};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 storage implementation.
#[derive(Clone)]
pub struct S3Storage {
    name: String,
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    portal_url: Option<String>,
    public: bool,
    primary: bool,
    default_when_blank: bool,
    bucket_ready: std::sync::Arc<OnceCell<()>>,
}

impl S3Storage {
    pub async fn open(settings: &BackendSettings) -> StorageResult<Self> {
        let region = settings
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key.clone(), secret_key.clone(), None, None, "attache");
                let mut builder = aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .credentials_provider(credentials);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                // No explicit credentials: fall back to the ambient AWS
                // credential chain (environment, profile, instance role).
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .load()
                    .await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            }
        };

        Ok(S3Storage {
            name: settings.name.clone(),
            client,
            bucket: settings.directory.clone(),
            region,
            endpoint: settings.endpoint.clone(),
            portal_url: settings.portal_url.clone(),
            public: settings.public,
            primary: settings.primary,
            default_when_blank: settings.default_when_blank,
            bucket_ready: std::sync::Arc::new(OnceCell::new()),
        })
    }

    /// One-time bucket existence check, creating the bucket when missing.
    /// Memoized for the backend's lifetime.
    async fn ensure_bucket(&self) -> StorageResult<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                match self.client.head_bucket().bucket(&self.bucket).send().await {
                    Ok(_) => Ok(()),
                    Err(_) => {
                        tracing::info!(bucket = %self.bucket, "bucket missing, creating");
                        self.client
                            .create_bucket()
                            .bucket(&self.bucket)
                            .send()
                            .await
                            .map_err(|e| {
                                StorageError::Backend(format!(
                                    "failed to create bucket {}: {}",
                                    self.bucket,
                                    DisplayErrorContext(&e)
                                ))
                            })?;
                        Ok(())
                    }
                }
            })
            .await
            .map(|_| ())
    }

    fn acl(&self, public: bool) -> Option<ObjectCannedAcl> {
        (public || self.public).then_some(ObjectCannedAcl::PublicRead)
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> StorageProvider {
        StorageProvider::S3
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn is_default_when_blank(&self) -> bool {
        self.default_when_blank
    }

    fn public_url(&self, key: &str) -> String {
        if let Some(base) = &self.portal_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(endpoint) = &self.endpoint {
            // Path-style for S3-compatible providers.
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    async fn store(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> StorageResult<()> {
        validate_key(key)?;
        self.ensure_bucket().await?;

        let size = data.len();
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type);
        if let Some(acl) = self.acl(public) {
            request = request.acl(acl);
        }

        request.send().await.map_err(|e| {
            tracing::error!(
                backend = %self.name,
                bucket = %self.bucket,
                key = %key,
                error = %DisplayErrorContext(&e),
                "s3 store failed"
            );
            StorageError::StoreFailed(DisplayErrorContext(&e).to_string())
        })?;

        tracing::info!(
            backend = %self.name,
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            "s3 store successful"
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Box<dyn StorageObject>>> {
        validate_key(key)?;

        let head = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Ok(None);
                }
                return Err(StorageError::Backend(service_error.to_string()));
            }
        };

        Ok(Some(Box::new(S3Object {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size: head.content_length().map(|len| len as u64),
            content_type: head.content_type().map(String::from),
            etag: head.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            metadata: head.metadata().cloned().unwrap_or_default(),
        })))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    backend = %self.name,
                    bucket = %self.bucket,
                    key = %key,
                    error = %DisplayErrorContext(&e),
                    "s3 delete failed"
                );
                StorageError::DeleteFailed(DisplayErrorContext(&e).to_string())
            })?;

        tracing::info!(backend = %self.name, bucket = %self.bucket, key = %key, "s3 delete successful");

        Ok(())
    }

    async fn rename(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> StorageResult<Box<dyn StorageObject>> {
        validate_key(old_key)?;
        validate_key(new_key)?;
        self.ensure_bucket().await?;

        let mut request = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, old_key))
            .key(new_key);
        if let Some(acl) = self.acl(false) {
            request = request.acl(acl);
        }

        request.send().await.map_err(|e| {
            StorageError::RenameFailed(DisplayErrorContext(&e).to_string())
        })?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(old_key)
            .send()
            .await
            .map_err(|e| StorageError::RenameFailed(DisplayErrorContext(&e).to_string()))?;

        tracing::info!(
            backend = %self.name,
            bucket = %self.bucket,
            old_key = %old_key,
            new_key = %new_key,
            "s3 rename successful"
        );

        self.get(new_key).await?.ok_or_else(|| {
            StorageError::RenameFailed(format!("renamed object missing: {}", new_key))
        })
    }
}

/// Handle to one object in an S3 bucket.
pub struct S3Object {
    client: Client,
    bucket: String,
    key: String,
    size: Option<u64>,
    content_type: Option<String>,
    etag: Option<String>,
    metadata: HashMap<String, String>,
}

impl S3Object {
    async fn fetch(&self) -> StorageResult<aws_sdk_s3::operation::get_object::GetObjectOutput> {
        self.client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(DisplayErrorContext(&e).to_string()))
    }
}

#[async_trait]
impl StorageObject for S3Object {
    async fn read(&self) -> StorageResult<Vec<u8>> {
        let output = self.fetch().await?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn stream(&self) -> StorageResult<ByteChunks> {
        let output = self.fetch().await?;
        let reader = tokio_util::io::ReaderStream::new(output.body.into_async_read());
        let stream = reader.map(|chunk| {
            chunk.map_err(|e| StorageError::DownloadFailed(format!("failed to read chunk: {}", e)))
        });
        Ok(Box::pin(stream))
    }

    async fn download(&self, to: &Path) -> StorageResult<()> {
        let output = self.fetch().await?;
        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(to).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
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
