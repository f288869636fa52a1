//! The upload record: state, styles, and pure queries.
//!
//! `Upload` owns its own fields and is meant to be embedded by (or stored
//! alongside) the application's persisted entity; it is serde
//! round-trippable so the persistence layer can snapshot it as a document.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attache_core::constants::ORIGINAL_STYLE;
use attache_core::{file_category_for, is_video_file, FileCategory, UploadSnapshot};

/// Lifecycle states of an upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    #[default]
    Loaded,
    Cached,
    Processing,
    Processed,
    Storing,
    Stored,
    Deleted,
    Error,
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            UploadState::Loaded => "loaded",
            UploadState::Cached => "cached",
            UploadState::Processing => "processing",
            UploadState::Processed => "processed",
            UploadState::Storing => "storing",
            UploadState::Stored => "stored",
            UploadState::Deleted => "deleted",
            UploadState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Metadata tracked per style.
///
/// After caching completes a record always has a determinable content type
/// and size, and points at a local cache file, a remote object, or (briefly,
/// during processing) neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleRecord {
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Name of the backend that owns `remote_path`, present once stored.
    #[serde(default)]
    pub backend: Option<String>,
}

/// Opaque reference to the external entity this upload belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: String,
}

/// One upload: an original file plus named derived styles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub state: UploadState,
    pub original_filename: String,
    /// Optional prefix prepended to every storage key.
    #[serde(default)]
    pub key_prefix: Option<String>,
    pub styles: BTreeMap<String, StyleRecord>,
    pub error_log: Vec<String>,
    #[serde(default)]
    pub category: FileCategory,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new() -> Self {
        let now = Utc::now();
        Upload {
            state: UploadState::Loaded,
            original_filename: String::new(),
            key_prefix: None,
            styles: BTreeMap::new(),
            error_log: Vec::new(),
            category: FileCategory::None,
            checksum: None,
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_owner(owner: OwnerRef) -> Self {
        let mut upload = Upload::new();
        upload.owner = Some(owner);
        upload
    }

    // State predicates

    pub fn is_loaded(&self) -> bool {
        self.state == UploadState::Loaded
    }

    pub fn is_cached(&self) -> bool {
        self.state == UploadState::Cached
    }

    pub fn is_processed(&self) -> bool {
        self.state == UploadState::Processed
    }

    pub fn is_stored(&self) -> bool {
        self.state == UploadState::Stored
    }

    pub fn is_deleted(&self) -> bool {
        self.state == UploadState::Deleted
    }

    pub fn is_error(&self) -> bool {
        self.state == UploadState::Error
    }

    // Filename handling

    /// Original filename with every character outside `[a-zA-Z0-9._-]`
    /// replaced by an underscore; path components are stripped first.
    pub fn sanitized_filename(&self) -> String {
        const MAX: usize = 255;
        let base = Path::new(&self.original_filename)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.original_filename);
        if base.contains("..") {
            return "file".to_string();
        }
        let sanitized: String = base
            .chars()
            .take(MAX)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.trim_matches(|c| c == '_' || c == '.').is_empty() {
            "file".to_string()
        } else {
            sanitized
        }
    }

    /// Sanitized filename without its extension.
    pub fn sanitized_basename(&self) -> String {
        let filename = self.sanitized_filename();
        Path::new(&filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&filename)
            .to_string()
    }

    /// Extension of the original filename, with leading dot; empty when the
    /// filename has none.
    pub fn extension(&self) -> String {
        Path::new(&self.original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default()
    }

    /// Deterministic storage key for a style: `[prefix/]style/basename+ext`.
    /// `ext` is the extension of the file being stored (styles may change
    /// the extension of the original).
    pub fn storage_key(&self, style_name: &str, ext: &str) -> String {
        let key = format!("{}/{}{}", style_name, self.sanitized_basename(), ext);
        match &self.key_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_matches('/'), key),
            None => key,
        }
    }

    // Style accessors

    pub fn style(&self, style_name: &str) -> Option<&StyleRecord> {
        self.styles.get(style_name)
    }

    pub fn style_exists(&self, style_name: &str) -> bool {
        self.styles.contains_key(style_name)
    }

    /// Remote path of a style, present once stored.
    pub fn path(&self, style_name: &str) -> Option<&str> {
        self.styles.get(style_name)?.remote_path.as_deref()
    }

    pub fn cache_path(&self, style_name: &str) -> Option<&Path> {
        self.styles.get(style_name)?.cache_path.as_deref()
    }

    pub fn content_type(&self, style_name: &str) -> Option<&str> {
        self.styles.get(style_name)?.content_type.as_deref()
    }

    pub fn size(&self, style_name: &str) -> Option<u64> {
        self.styles.get(style_name)?.size
    }

    // Classification

    pub fn is_image(&self, style_name: &str) -> bool {
        self.content_type(style_name)
            .is_some_and(|ct| ct.contains("image"))
    }

    pub fn is_audio(&self, style_name: &str) -> bool {
        self.content_type(style_name)
            .is_some_and(|ct| ct.contains("audio"))
    }

    /// Video check by content type, with a filename fallback since some
    /// providers under-report video content types.
    pub fn is_video(&self, style_name: &str) -> bool {
        if self
            .content_type(style_name)
            .is_some_and(|ct| ct.contains("video"))
        {
            return true;
        }
        let record = match self.styles.get(style_name) {
            Some(record) => record,
            None => return false,
        };
        let filename = record
            .remote_path
            .as_deref()
            .or_else(|| record.cache_path.as_deref().and_then(|p| p.to_str()))
            .unwrap_or(&self.original_filename);
        is_video_file(filename)
    }

    /// Category cached at ingestion time, recomputed from the filename rules
    /// when absent.
    pub fn file_category(&self) -> FileCategory {
        if self.category != FileCategory::None {
            return self.category;
        }
        if self.original_filename.is_empty() {
            return FileCategory::None;
        }
        file_category_for(&self.original_filename)
    }

    /// Read-only view handed to validation and post-cache hooks.
    pub fn snapshot(&self) -> UploadSnapshot {
        let original = self.styles.get(ORIGINAL_STYLE);
        UploadSnapshot {
            original_filename: self.original_filename.clone(),
            content_type: original.and_then(|record| record.content_type.clone()),
            size: original.and_then(|record| record.size),
            category: self.category,
            checksum: self.checksum.clone(),
        }
    }
}

impl Default for Upload {
    fn default() -> Self {
        Upload::new()
    }
}
