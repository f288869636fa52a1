//! The upload engine.
//!
//! Drives an [`Upload`] record through cache → process → store, plus
//! reprocessing, deletion, and key renames. Operations mutate the record
//! in place and expect a single writer per record; failures during an
//! attempt are appended to the record's error log and surfaced through the
//! `Error` state rather than returned as `Err`. `Err` returns are reserved
//! for misuse (unknown styles, wrong state, reprocessing the original).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;

use attache_core::constants::ORIGINAL_STYLE;
use attache_core::{content_type_for, file_category_for, CacheDir, PostCacheHook, Validate};
use attache_storage::StorageRegistry;

use crate::error::UploadError;
use crate::persist::{NoOpRecordStore, RecordStore};
use crate::record::{StyleRecord, Upload, UploadState};
use crate::source::UploadSource;
use crate::style::{StyleRegistry, StyleTransform, TransformContext};

/// How many times the store step is attempted before giving up.
pub const STORE_ATTEMPTS: usize = 3;

/// Engine driving upload records through the lifecycle.
pub struct Uploader {
    registry: Arc<StorageRegistry>,
    styles: StyleRegistry,
    validators: Vec<Arc<dyn Validate>>,
    post_cache: Vec<(String, Arc<dyn PostCacheHook>)>,
    record_store: Arc<dyn RecordStore>,
    cache_dir: CacheDir,
    store_attempts: usize,
}

impl Uploader {
    pub fn new(registry: Arc<StorageRegistry>, cache_dir: CacheDir) -> Self {
        Uploader {
            registry,
            styles: StyleRegistry::new(),
            validators: Vec::new(),
            post_cache: Vec::new(),
            record_store: Arc::new(NoOpRecordStore),
            cache_dir,
            store_attempts: STORE_ATTEMPTS,
        }
    }

    pub fn with_record_store(mut self, record_store: Arc<dyn RecordStore>) -> Self {
        self.record_store = record_store;
        self
    }

    pub fn with_store_attempts(mut self, attempts: usize) -> Self {
        self.store_attempts = attempts.max(1);
        self
    }

    pub fn add_style(
        &mut self,
        style_name: &str,
        transform: Arc<dyn StyleTransform>,
    ) -> Result<(), UploadError> {
        self.styles.add(style_name, transform)
    }

    pub fn add_fn_style<F>(&mut self, style_name: &str, func: F) -> Result<(), UploadError>
    where
        F: Fn(&TransformContext, &Path) -> anyhow::Result<Option<std::path::PathBuf>>
            + Send
            + Sync
            + 'static,
    {
        self.styles.add_fn(style_name, func)
    }

    pub fn add_validator(&mut self, validator: Arc<dyn Validate>) {
        self.validators.push(validator);
    }

    pub fn add_post_cache_hook(&mut self, name: &str, hook: Arc<dyn PostCacheHook>) {
        self.post_cache.push((name.to_string(), hook));
    }

    pub fn styles(&self) -> &StyleRegistry {
        &self.styles
    }

    pub fn cache_dir(&self) -> &CacheDir {
        &self.cache_dir
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Full chain for a fresh record: cache, process, and store the source
    /// in one call. The returned record is `Stored` on success; failures
    /// leave it in `Error` with diagnostics in its error log.
    pub async fn ingest(&self, source: UploadSource) -> Result<Upload, UploadError> {
        let mut upload = Upload::new();
        self.cache(&mut upload, source).await?;
        if upload.is_cached() {
            self.store(&mut upload).await?;
        }
        Ok(upload)
    }

    /// Materialize the source into a local cache file and record the
    /// original's metadata. Validation failures remove the cache file and
    /// leave the record in `Error`.
    pub async fn cache(
        &self,
        upload: &mut Upload,
        source: UploadSource,
    ) -> Result<(), UploadError> {
        let filename = source.filename()?;
        upload.error_log.clear();
        upload.original_filename = filename;
        upload.state = UploadState::Loaded;
        self.save(upload).await;

        let cache_name = self.cache_dir.generate_cache_name(&upload.extension());
        let cache_path = match self.materialize(&cache_name, source).await {
            Ok(path) => path,
            Err(error) => {
                upload.error_log.push(format!("CACHE: {:#}", error));
                upload.state = UploadState::Error;
                self.save(upload).await;
                return Ok(());
            }
        };

        let data = match fs::read(&cache_path).await {
            Ok(data) => data,
            Err(error) => {
                upload.error_log.push(format!("CACHE: {}", error));
                upload.state = UploadState::Error;
                let _ = fs::remove_file(&cache_path).await;
                self.save(upload).await;
                return Ok(());
            }
        };

        upload.category = file_category_for(&upload.original_filename);
        upload.checksum = Some(hex::encode(Sha256::digest(&data)));
        upload.styles.insert(
            ORIGINAL_STYLE.to_string(),
            StyleRecord {
                cache_path: Some(cache_path.clone()),
                content_type: Some(content_type_for(&upload.sanitized_filename())),
                size: Some(data.len() as u64),
                ..Default::default()
            },
        );

        let snapshot = upload.snapshot();
        for (hook_name, hook) in &self.post_cache {
            if let Err(error) = hook.run(&snapshot, &cache_path).await {
                upload
                    .error_log
                    .push(format!("CACHE: hook {} failed: {:#}", hook_name, error));
            }
        }

        if upload.error_log.is_empty() {
            for validator in &self.validators {
                for diagnostic in validator.validate(&snapshot).await {
                    upload.error_log.push(format!("VALIDATE: {}", diagnostic));
                }
            }
        }

        if upload.error_log.is_empty() {
            upload.state = UploadState::Cached;
            tracing::info!(
                filename = %upload.original_filename,
                size_bytes = data.len(),
                category = %upload.category,
                "upload cached"
            );
        } else {
            if let Err(error) = fs::remove_file(&cache_path).await {
                tracing::warn!(path = %cache_path.display(), %error, "failed to remove rejected cache file");
            }
            upload.styles.remove(ORIGINAL_STYLE);
            upload.state = UploadState::Error;
        }
        self.save(upload).await;
        Ok(())
    }

    async fn materialize(
        &self,
        cache_name: &str,
        source: UploadSource,
    ) -> anyhow::Result<std::path::PathBuf> {
        use anyhow::Context;

        match source {
            UploadSource::Bytes { data, .. } => {
                Ok(self.cache_dir.save_bytes(cache_name, &data).await?)
            }
            UploadSource::Text { body, .. } => {
                Ok(self.cache_dir.write_str(cache_name, &body).await?)
            }
            UploadSource::Base64 { encoded, .. } => {
                let data = BASE64
                    .decode(encoded.as_bytes())
                    .context("invalid base64 payload")?;
                Ok(self.cache_dir.save_bytes(cache_name, &data).await?)
            }
            UploadSource::LocalPath { path } => {
                Ok(self.cache_dir.copy_into(cache_name, &path).await?)
            }
            UploadSource::Url { url, .. } => {
                Ok(self.cache_dir.download_into(cache_name, &url).await?)
            }
        }
    }

    /// Run every registered style against the cached original, in
    /// registration order. The first failing transform aborts the rest;
    /// styles produced before it keep their cache files.
    pub async fn process(&self, upload: &mut Upload) -> Result<(), UploadError> {
        if upload.is_error() {
            return Ok(());
        }
        if !upload.is_cached() {
            return Err(UploadError::InvalidState {
                op: "process",
                state: upload.state,
            });
        }
        let original_path = upload
            .styles
            .get(ORIGINAL_STYLE)
            .and_then(|record| record.cache_path.clone())
            .ok_or_else(|| UploadError::MissingStyleData(ORIGINAL_STYLE.to_string()))?;

        upload.state = UploadState::Processing;
        self.save(upload).await;

        for (style_name, transform) in self.styles.iter() {
            let ctx = self.transform_context(upload, style_name);
            let derived = match transform.derive(&ctx, &original_path).await {
                Ok(Some(path)) => path,
                Ok(None) => {
                    tracing::debug!(style = %style_name, "style produced no output");
                    continue;
                }
                Err(error) => {
                    upload
                        .error_log
                        .push(format!("PROCESS: {}: {:#}", style_name, error));
                    upload.state = UploadState::Error;
                    self.save(upload).await;
                    return Ok(());
                }
            };

            let size = match fs::metadata(&derived).await {
                Ok(meta) => meta.len(),
                Err(error) => {
                    upload
                        .error_log
                        .push(format!("PROCESS: {}: {}", style_name, error));
                    upload.state = UploadState::Error;
                    self.save(upload).await;
                    return Ok(());
                }
            };

            // A prior attempt may have left a cache file for this style.
            if let Some(previous) = upload
                .styles
                .get(style_name)
                .and_then(|record| record.cache_path.clone())
            {
                if previous != derived {
                    let _ = fs::remove_file(&previous).await;
                }
            }

            let derived_name = derived
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(style_name)
                .to_string();
            upload.styles.insert(
                style_name.to_string(),
                StyleRecord {
                    cache_path: Some(derived),
                    content_type: Some(content_type_for(&derived_name)),
                    size: Some(size),
                    ..Default::default()
                },
            );
            tracing::debug!(style = %style_name, size_bytes = size, "style processed");
        }

        upload.state = UploadState::Processed;
        self.save(upload).await;
        Ok(())
    }

    /// Store every style with an unstored cache file, retrying the whole
    /// step up to the attempt ceiling. Idempotent: a `Stored` record is a
    /// no-op, a `Cached` record is processed first, and styles whose cache
    /// file is already gone are never re-uploaded.
    pub async fn store(&self, upload: &mut Upload) -> Result<(), UploadError> {
        match upload.state {
            UploadState::Stored | UploadState::Error => return Ok(()),
            UploadState::Cached => {
                self.process(upload).await?;
                if !upload.is_processed() {
                    return Ok(());
                }
            }
            UploadState::Processed => {}
            state => {
                return Err(UploadError::InvalidState { op: "store", state });
            }
        }

        upload.state = UploadState::Storing;
        self.save(upload).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store_styles(upload).await {
                Ok(()) => {
                    upload.state = UploadState::Stored;
                    self.save(upload).await;
                    tracing::info!(filename = %upload.original_filename, "upload stored");
                    return Ok(());
                }
                Err(error) => {
                    upload.error_log.push(format!("STORE: {}", error));
                    tracing::warn!(attempt, %error, "store attempt failed");
                    if attempt >= self.store_attempts {
                        upload.state = UploadState::Error;
                        self.save(upload).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn store_styles(&self, upload: &mut Upload) -> Result<(), UploadError> {
        let style_names: Vec<String> = upload.styles.keys().cloned().collect();
        for style_name in style_names {
            let (cache_path, recorded_backend, recorded_type) = {
                let record = match upload.styles.get(&style_name) {
                    Some(record) => record,
                    None => continue,
                };
                match &record.cache_path {
                    Some(path) => (
                        path.clone(),
                        record.backend.clone(),
                        record.content_type.clone(),
                    ),
                    None => continue,
                }
            };

            let backend = self.registry.resolve(recorded_backend.as_deref())?;
            let key = upload.storage_key(&style_name, &file_extension(&cache_path));
            let data = fs::read(&cache_path).await?;
            let size = data.len() as u64;
            let content_type = recorded_type.unwrap_or_else(|| {
                content_type_for(
                    cache_path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .unwrap_or(&style_name),
                )
            });

            backend.store(&key, data, &content_type, false).await?;

            if let Some(record) = upload.styles.get_mut(&style_name) {
                record.remote_path = Some(key);
                record.backend = Some(backend.name().to_string());
                record.content_type = Some(content_type);
                record.size = Some(size);
                record.cache_path = None;
            }
            if let Err(error) = fs::remove_file(&cache_path).await {
                tracing::warn!(path = %cache_path.display(), %error, "failed to remove stored cache file");
            }
            self.save(upload).await;
        }
        Ok(())
    }

    /// Re-derive a subset of styles from the stored original. Each style is
    /// handled independently; the first failure aborts the styles after it
    /// and leaves the ones before it refreshed. Only valid on a `Stored`
    /// record, and the original itself can never be reprocessed.
    pub async fn reprocess(
        &self,
        upload: &mut Upload,
        style_names: &[&str],
    ) -> Result<(), UploadError> {
        if style_names.iter().any(|name| *name == ORIGINAL_STYLE) {
            return Err(UploadError::ReprocessOriginal);
        }
        if !upload.is_stored() {
            return Err(UploadError::InvalidState {
                op: "reprocess",
                state: upload.state,
            });
        }
        for name in style_names {
            if self.styles.get(name).is_none() {
                return Err(UploadError::UnknownStyle(name.to_string()));
            }
        }

        let (original_remote, original_backend) = {
            let record = upload
                .styles
                .get(ORIGINAL_STYLE)
                .ok_or_else(|| UploadError::MissingStyleData(ORIGINAL_STYLE.to_string()))?;
            let remote = record
                .remote_path
                .clone()
                .ok_or_else(|| UploadError::MissingStyleData(ORIGINAL_STYLE.to_string()))?;
            (remote, record.backend.clone())
        };

        let backend = self.registry.resolve(original_backend.as_deref())?;
        let scratch = self
            .cache_dir
            .new_cache_file(&file_extension(Path::new(&original_remote)));
        backend.download(&original_remote, &scratch).await?;

        let result = self.reprocess_styles(upload, style_names, &scratch).await;

        if let Err(error) = fs::remove_file(&scratch).await {
            tracing::warn!(path = %scratch.display(), %error, "failed to remove reprocess scratch file");
        }
        self.save(upload).await;
        result
    }

    async fn reprocess_styles(
        &self,
        upload: &mut Upload,
        style_names: &[&str],
        original_path: &Path,
    ) -> Result<(), UploadError> {
        for style_name in style_names {
            // Drop the style's previous remote object and any stray cache file.
            if let Some(record) = upload.styles.get(*style_name) {
                if let Some(remote) = record.remote_path.clone() {
                    let backend = self.registry.resolve(record.backend.as_deref())?;
                    if let Err(error) = backend.delete(&remote).await {
                        tracing::warn!(style = %style_name, %error, "failed to delete replaced remote object");
                    }
                }
                if let Some(stray) = record.cache_path.clone() {
                    let _ = fs::remove_file(&stray).await;
                }
            }

            let transform = match self.styles.get(style_name) {
                Some(transform) => transform.clone(),
                None => continue,
            };
            let ctx = self.transform_context(upload, style_name);
            let derived = match transform.derive(&ctx, original_path).await {
                Ok(Some(path)) => path,
                Ok(None) => {
                    upload.styles.remove(*style_name);
                    continue;
                }
                Err(error) => {
                    upload
                        .error_log
                        .push(format!("REPROCESS: {}: {:#}", style_name, error));
                    return Ok(());
                }
            };

            let data = match fs::read(&derived).await {
                Ok(data) => data,
                Err(error) => {
                    upload
                        .error_log
                        .push(format!("REPROCESS: {}: {}", style_name, error));
                    return Ok(());
                }
            };
            let size = data.len() as u64;
            let derived_name = derived
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(style_name)
                .to_string();
            let content_type = content_type_for(&derived_name);

            let recorded_backend = upload
                .styles
                .get(*style_name)
                .and_then(|record| record.backend.clone());
            let backend = self.registry.resolve(recorded_backend.as_deref())?;
            let key = upload.storage_key(style_name, &file_extension(&derived));

            if let Err(error) = backend.store(&key, data, &content_type, false).await {
                upload
                    .error_log
                    .push(format!("REPROCESS: {}: {}", style_name, error));
                return Ok(());
            }

            upload.styles.insert(
                style_name.to_string(),
                StyleRecord {
                    remote_path: Some(key),
                    backend: Some(backend.name().to_string()),
                    content_type: Some(content_type),
                    size: Some(size),
                    cache_path: None,
                },
            );
            if let Err(error) = fs::remove_file(&derived).await {
                tracing::warn!(path = %derived.display(), %error, "failed to remove reprocessed cache file");
            }
            self.save(upload).await;
            tracing::info!(style = %style_name, "style reprocessed");
        }
        Ok(())
    }

    /// Best-effort removal of every remote object and cache file. The
    /// record always transitions to `Deleted`; individual delete failures
    /// are logged and swallowed.
    pub async fn delete_files(&self, upload: &mut Upload) -> Result<(), UploadError> {
        for (style_name, record) in upload.styles.iter() {
            if let Some(remote) = &record.remote_path {
                match self.registry.resolve(record.backend.as_deref()) {
                    Ok(backend) => {
                        if let Err(error) = backend.delete(remote).await {
                            tracing::warn!(style = %style_name, key = %remote, %error, "remote delete failed");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(style = %style_name, %error, "backend missing for delete");
                    }
                }
            }
            if let Some(cache_path) = &record.cache_path {
                if fs::try_exists(cache_path).await.unwrap_or(false) {
                    if let Err(error) = fs::remove_file(cache_path).await {
                        tracing::warn!(path = %cache_path.display(), %error, "cache delete failed");
                    }
                }
            }
        }
        upload.state = UploadState::Deleted;
        self.save(upload).await;
        Ok(())
    }

    /// Rename a style's remote object to the key the naming scheme would
    /// currently produce. No-op when the key is unchanged.
    pub async fn update_style_path(
        &self,
        upload: &mut Upload,
        style_name: &str,
    ) -> Result<(), UploadError> {
        let (remote, recorded_backend) = {
            let record = upload
                .styles
                .get(style_name)
                .ok_or_else(|| UploadError::UnknownStyle(style_name.to_string()))?;
            let remote = record
                .remote_path
                .clone()
                .ok_or_else(|| UploadError::MissingStyleData(style_name.to_string()))?;
            (remote, record.backend.clone())
        };

        let new_key = upload.storage_key(style_name, &file_extension(Path::new(&remote)));
        if new_key == remote {
            return Ok(());
        }

        let backend = self.registry.resolve(recorded_backend.as_deref())?;
        backend.rename(&remote, &new_key).await?;

        if let Some(record) = upload.styles.get_mut(style_name) {
            record.remote_path = Some(new_key.clone());
        }
        self.save(upload).await;
        tracing::info!(style = %style_name, old_key = %remote, new_key = %new_key, "style path updated");
        Ok(())
    }

    /// Adopt an already-stored object as a style, refreshing its metadata
    /// from the backend.
    pub async fn add_file(
        &self,
        upload: &mut Upload,
        style_name: &str,
        key: &str,
        backend_name: Option<&str>,
    ) -> Result<(), UploadError> {
        let backend = self.registry.resolve(backend_name)?;
        let (content_type, size) = match backend.get(key).await? {
            Some(object) => (
                object
                    .content_type()
                    .map(String::from)
                    .unwrap_or_else(|| content_type_for(key)),
                object.size().unwrap_or(0),
            ),
            None => (content_type_for(key), 0),
        };

        upload.styles.insert(
            style_name.to_string(),
            StyleRecord {
                remote_path: Some(key.to_string()),
                backend: Some(backend.name().to_string()),
                content_type: Some(content_type),
                size: Some(size),
                cache_path: None,
            },
        );
        upload.state = UploadState::Stored;
        self.save(upload).await;
        Ok(())
    }

    /// Public URL for a style: its backend's URL once stored, the cache
    /// store's URL while only cached, `None` when neither exists (the
    /// application supplies its own default).
    pub fn url(&self, upload: &Upload, style_name: &str) -> Option<String> {
        let record = upload.styles.get(style_name)?;
        if let Some(remote) = &record.remote_path {
            if let Ok(backend) = self.registry.resolve(record.backend.as_deref()) {
                return Some(backend.public_url(remote));
            }
        }
        if let Some(cache_path) = &record.cache_path {
            if let Some(name) = cache_path.file_name().and_then(|name| name.to_str()) {
                return Some(self.registry.cache().public_url(name));
            }
        }
        None
    }

    /// URLs for every style that resolves to one.
    pub fn url_map(&self, upload: &Upload) -> BTreeMap<String, String> {
        upload
            .styles
            .keys()
            .filter_map(|style_name| {
                self.url(upload, style_name)
                    .map(|url| (style_name.clone(), url))
            })
            .collect()
    }

    fn transform_context(&self, upload: &Upload, style_name: &str) -> TransformContext {
        TransformContext {
            style: style_name.to_string(),
            original_filename: upload.original_filename.clone(),
            content_type: upload.content_type(ORIGINAL_STYLE).map(String::from),
            category: upload.category,
            cache: self.cache_dir.clone(),
        }
    }

    async fn save(&self, upload: &mut Upload) {
        upload.updated_at = Utc::now();
        if let Err(error) = self.record_store.save(upload).await {
            tracing::warn!(%error, "record save failed");
        }
    }
}

/// Extension of a path with leading dot; empty when there is none.
fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}
