//! Upload sources.
//!
//! The lifecycle accepts raw bytes, a remote URL, a local file path, an
//! in-memory string, or a base64 blob; each resolves to an original
//! filename that drives content-type detection and key naming.

use std::path::PathBuf;

use crate::error::UploadError;

/// Material an upload is created from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Raw bytes, e.g. the body of a multipart upload.
    Bytes { filename: String, data: Vec<u8> },
    /// Remote URL, downloaded at cache time. When `filename` is not given
    /// it is derived from the URL path.
    Url {
        url: String,
        filename: Option<String>,
    },
    /// Existing local file, copied into the cache.
    LocalPath { path: PathBuf },
    /// In-memory string.
    Text { filename: String, body: String },
    /// Base64-encoded blob (standard alphabet).
    Base64 { filename: String, encoded: String },
}

impl UploadSource {
    /// The original filename this source carries.
    pub fn filename(&self) -> Result<String, UploadError> {
        match self {
            UploadSource::Bytes { filename, .. }
            | UploadSource::Text { filename, .. }
            | UploadSource::Base64 { filename, .. } => Ok(filename.clone()),
            UploadSource::Url { url, filename } => {
                if let Some(filename) = filename {
                    return Ok(filename.clone());
                }
                url.split(['?', '#'])
                    .next()
                    .and_then(|path| path.rsplit('/').next())
                    .filter(|segment| !segment.is_empty() && !segment.contains(':'))
                    .map(String::from)
                    .ok_or_else(|| {
                        UploadError::InvalidSource(format!("cannot derive filename from {}", url))
                    })
            }
            UploadSource::LocalPath { path } => path
                .file_name()
                .and_then(|name| name.to_str())
                .map(String::from)
                .ok_or_else(|| {
                    UploadError::InvalidSource(format!(
                        "cannot derive filename from {}",
                        path.display()
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_filename_derivation() {
        let source = UploadSource::Url {
            url: "https://example.com/media/photo.jpg?w=300#frag".to_string(),
            filename: None,
        };
        assert_eq!(source.filename().unwrap(), "photo.jpg");

        let source = UploadSource::Url {
            url: "https://example.com/".to_string(),
            filename: None,
        };
        assert!(source.filename().is_err());

        let source = UploadSource::Url {
            url: "https://example.com/a/b.png".to_string(),
            filename: Some("override.png".to_string()),
        };
        assert_eq!(source.filename().unwrap(), "override.png");
    }

    #[test]
    fn test_local_path_filename() {
        let source = UploadSource::LocalPath {
            path: PathBuf::from("/tmp/somewhere/doc.pdf"),
        };
        assert_eq!(source.filename().unwrap(), "doc.pdf");
    }
}
