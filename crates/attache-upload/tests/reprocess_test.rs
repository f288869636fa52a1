//! Reprocessing stored styles from the stored original.

mod helpers;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use attache_upload::{TransformContext, Upload, UploadError, UploadState};
use helpers::{backend_file, note_source, primary_backend, uploader_with};

/// Style whose output changes on every run, so a reprocess is observable.
fn add_versioned_style(uploader: &mut attache_upload::Uploader) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    uploader
        .add_fn_style("stamp", move |ctx: &TransformContext, original: &Path| {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let body = std::fs::read_to_string(original)?;
            let out = ctx.cache.new_cache_file(".txt");
            std::fs::write(&out, format!("v{}:{}", run, body))?;
            Ok(Some(out))
        })
        .unwrap();
    runs
}

#[tokio::test]
async fn test_reprocess_refreshes_named_styles_only() {
    let dir = tempdir().unwrap();
    let mut uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    add_versioned_style(&mut uploader);

    let mut upload = uploader.ingest(note_source()).await.unwrap();
    let stamp_path = backend_file(dir.path(), "primary", "stamp/note.txt");
    assert_eq!(std::fs::read(&stamp_path).unwrap(), b"v1:ten bytes!");

    uploader.reprocess(&mut upload, &["stamp"]).await.unwrap();

    assert_eq!(upload.state, UploadState::Stored);
    assert!(upload.error_log.is_empty());
    assert_eq!(std::fs::read(&stamp_path).unwrap(), b"v2:ten bytes!");
    assert_eq!(upload.size("stamp"), Some(13));

    // The original is untouched.
    assert_eq!(upload.path("original"), Some("original/note.txt"));
    let original_path = backend_file(dir.path(), "primary", "original/note.txt");
    assert_eq!(std::fs::read(&original_path).unwrap(), b"ten bytes!");

    // The temporary original download was cleaned up.
    let uploads_dir = dir.path().join("uploads");
    assert!(std::fs::read_dir(&uploads_dir).unwrap().next().is_none());
}

#[tokio::test]
async fn test_reprocess_original_is_rejected_without_mutation() {
    let dir = tempdir().unwrap();
    let mut uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    add_versioned_style(&mut uploader);

    let mut upload = uploader.ingest(note_source()).await.unwrap();
    let before = upload.clone();

    let result = uploader.reprocess(&mut upload, &["original"]).await;
    assert!(matches!(result, Err(UploadError::ReprocessOriginal)));

    assert_eq!(upload.state, before.state);
    assert_eq!(upload.styles, before.styles);
    assert_eq!(upload.error_log, before.error_log);

    // Same rejection when the original is buried in a subset.
    let result = uploader.reprocess(&mut upload, &["stamp", "original"]).await;
    assert!(matches!(result, Err(UploadError::ReprocessOriginal)));
    assert_eq!(upload.styles, before.styles);
}

#[tokio::test]
async fn test_reprocess_requires_stored_state() {
    let dir = tempdir().unwrap();
    let mut uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    add_versioned_style(&mut uploader);

    let mut upload = Upload::new();
    uploader.cache(&mut upload, note_source()).await.unwrap();
    assert_eq!(upload.state, UploadState::Cached);

    let result = uploader.reprocess(&mut upload, &["stamp"]).await;
    assert!(matches!(result, Err(UploadError::InvalidState { .. })));
}

#[tokio::test]
async fn test_reprocess_unknown_style_is_rejected() {
    let dir = tempdir().unwrap();
    let mut uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    add_versioned_style(&mut uploader);

    let mut upload = uploader.ingest(note_source()).await.unwrap();
    let result = uploader.reprocess(&mut upload, &["nope"]).await;
    assert!(matches!(result, Err(UploadError::UnknownStyle(_))));
}

#[tokio::test]
async fn test_reprocess_failure_leaves_earlier_styles_refreshed() {
    let dir = tempdir().unwrap();
    let mut uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    add_versioned_style(&mut uploader);

    let counter = Arc::new(AtomicUsize::new(0));
    uploader
        .add_fn_style("fragile", move |ctx: &TransformContext, original: &Path| {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if run > 1 {
                anyhow::bail!("fragile transform gave up");
            }
            let body = std::fs::read_to_string(original)?;
            let out = ctx.cache.new_cache_file(".txt");
            std::fs::write(&out, body)?;
            Ok(Some(out))
        })
        .unwrap();

    let mut upload = uploader.ingest(note_source()).await.unwrap();

    // "stamp" refreshes first, then "fragile" fails; "stamp" keeps its new
    // content and the record stays stored with a diagnostic.
    uploader
        .reprocess(&mut upload, &["stamp", "fragile"])
        .await
        .unwrap();

    assert_eq!(upload.state, UploadState::Stored);
    assert_eq!(upload.error_log.len(), 1);
    assert!(upload.error_log[0].starts_with("REPROCESS: fragile"));

    let stamp_path = backend_file(dir.path(), "primary", "stamp/note.txt");
    assert_eq!(std::fs::read(&stamp_path).unwrap(), b"v2:ten bytes!");
}
