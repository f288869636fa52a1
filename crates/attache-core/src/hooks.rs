//! Hooks for application integration.
//!
//! The upload lifecycle calls out to the application through these traits:
//! validation after caching, and named post-cache side effects (EXIF
//! extraction and the like). Hosts receive a read-only snapshot of the
//! upload's cached metadata rather than the record itself.

use std::path::Path;

use async_trait::async_trait;

use crate::media::FileCategory;

/// Read-only view of an upload's cached metadata, handed to hooks.
#[derive(Debug, Clone)]
pub struct UploadSnapshot {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub category: FileCategory,
    pub checksum: Option<String>,
}

/// Validation hook, run after caching and post-cache hooks.
///
/// Returned diagnostics are appended to the upload's error log; an empty
/// vector means the upload passed.
#[async_trait]
pub trait Validate: Send + Sync {
    async fn validate(&self, upload: &UploadSnapshot) -> Vec<String>;
}

/// Side-effecting hook run between caching and validation, keyed by name.
#[async_trait]
pub trait PostCacheHook: Send + Sync {
    async fn run(&self, upload: &UploadSnapshot, original: &Path) -> anyhow::Result<()>;
}
