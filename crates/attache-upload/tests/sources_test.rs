//! Caching from each supported source kind.

mod helpers;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tempfile::tempdir;

use attache_core::FileCategory;
use attache_upload::{Upload, UploadSource, UploadState};
use helpers::{primary_backend, uploader_with};

const PAYLOAD: &[u8] = b"some file content";

async fn cache_source(source: UploadSource) -> Upload {
    let dir = tempdir().unwrap();
    let uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    let mut upload = Upload::new();
    uploader.cache(&mut upload, source).await.unwrap();
    upload
}

fn assert_cached(upload: &Upload, content_type: &str) {
    assert_eq!(upload.state, UploadState::Cached);
    assert_eq!(upload.size("original"), Some(PAYLOAD.len() as u64));
    assert_eq!(upload.content_type("original"), Some(content_type));
    assert!(upload.checksum.is_some());
    assert!(upload.cache_path("original").is_some());
}

#[tokio::test]
async fn test_cache_from_bytes() {
    let dir = tempdir().unwrap();
    let uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;
    let mut upload = Upload::new();
    uploader
        .cache(
            &mut upload,
            UploadSource::Bytes {
                filename: "data.bin".to_string(),
                data: PAYLOAD.to_vec(),
            },
        )
        .await
        .unwrap();

    assert_cached(&upload, "application/octet-stream");
    assert_eq!(upload.original_filename, "data.bin");
    // The cache file holds exactly the source bytes.
    let cache_path = upload.cache_path("original").unwrap();
    assert_eq!(std::fs::read(cache_path).unwrap(), PAYLOAD);
}

#[tokio::test]
async fn test_cache_from_text() {
    let upload = cache_source(UploadSource::Text {
        filename: "data.txt".to_string(),
        body: String::from_utf8(PAYLOAD.to_vec()).unwrap(),
    })
    .await;
    assert_cached(&upload, "text/plain");
}

#[tokio::test]
async fn test_cache_from_base64() {
    let upload = cache_source(UploadSource::Base64 {
        filename: "data.txt".to_string(),
        encoded: STANDARD.encode(PAYLOAD),
    })
    .await;
    assert_cached(&upload, "text/plain");
}

#[tokio::test]
async fn test_cache_from_local_path() {
    let dir = tempdir().unwrap();
    let source_path = dir.path().join("data.txt");
    std::fs::write(&source_path, PAYLOAD).unwrap();

    let upload = cache_source(UploadSource::LocalPath { path: source_path }).await;
    assert_cached(&upload, "text/plain");
    assert_eq!(upload.original_filename, "data.txt");
}

#[tokio::test]
async fn test_invalid_base64_is_a_cache_error() {
    let dir = tempdir().unwrap();
    let uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;

    let mut upload = Upload::new();
    uploader
        .cache(
            &mut upload,
            UploadSource::Base64 {
                filename: "data.bin".to_string(),
                encoded: "not base64 at all!!!".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(upload.state, UploadState::Error);
    assert!(upload.error_log[0].starts_with("CACHE: "));
    assert!(!upload.style_exists("original"));
}

#[tokio::test]
async fn test_missing_local_path_is_a_cache_error() {
    let dir = tempdir().unwrap();
    let uploader = uploader_with(dir.path(), vec![primary_backend(dir.path())]).await;

    let mut upload = Upload::new();
    uploader
        .cache(
            &mut upload,
            UploadSource::LocalPath {
                path: dir.path().join("does-not-exist.txt"),
            },
        )
        .await
        .unwrap();

    assert_eq!(upload.state, UploadState::Error);
    assert!(upload.error_log[0].starts_with("CACHE: "));
}

#[tokio::test]
async fn test_cache_classifies_categories() {
    let upload = cache_source(UploadSource::Bytes {
        filename: "photo.png".to_string(),
        data: PAYLOAD.to_vec(),
    })
    .await;
    assert_eq!(upload.category, FileCategory::Image);

    let upload = cache_source(UploadSource::Bytes {
        filename: "clip.mp4".to_string(),
        data: PAYLOAD.to_vec(),
    })
    .await;
    assert_eq!(upload.category, FileCategory::Video);

    let upload = cache_source(UploadSource::Bytes {
        filename: "track.mp3".to_string(),
        data: PAYLOAD.to_vec(),
    })
    .await;
    assert_eq!(upload.category, FileCategory::Audio);
}

#[tokio::test]
async fn test_checksum_matches_content_not_name() {
    let a = cache_source(UploadSource::Bytes {
        filename: "one.bin".to_string(),
        data: PAYLOAD.to_vec(),
    })
    .await;
    let b = cache_source(UploadSource::Bytes {
        filename: "two.bin".to_string(),
        data: PAYLOAD.to_vec(),
    })
    .await;
    assert_eq!(a.checksum, b.checksum);

    let c = cache_source(UploadSource::Bytes {
        filename: "three.bin".to_string(),
        data: b"different".to_vec(),
    })
    .await;
    assert_ne!(a.checksum, c.checksum);
}
