//! File classification rules.
//!
//! Content types are resolved from the filename only; no content sniffing.
//! Video classification additionally falls back to an extension allow-list
//! because several providers report generic MIME data for video files.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::constants::{FALLBACK_CONTENT_TYPE, VIDEO_EXTENSIONS};

/// Coarse file classification derived from content type and filename.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    #[default]
    None,
    Image,
    Video,
    Audio,
    File,
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileCategory::None => write!(f, "none"),
            FileCategory::Image => write!(f, "image"),
            FileCategory::Video => write!(f, "video"),
            FileCategory::Audio => write!(f, "audio"),
            FileCategory::File => write!(f, "file"),
        }
    }
}

/// Resolve a MIME content type for a filename.
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Whether the filename carries one of the known video extensions.
pub fn is_video_file(filename: &str) -> bool {
    let lowered = filename.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

pub fn is_image_file(filename: &str) -> bool {
    content_type_for(filename).contains("image")
}

pub fn is_audio_file(filename: &str) -> bool {
    content_type_for(filename).contains("audio")
}

/// Classify a filename. Image and audio win over the video extension
/// fallback; anything else is a plain file.
pub fn file_category_for(filename: &str) -> FileCategory {
    let content_type = content_type_for(filename);
    if content_type.contains("image") {
        FileCategory::Image
    } else if content_type.contains("audio") {
        FileCategory::Audio
    } else if is_video_file(filename) {
        FileCategory::Video
    } else {
        FileCategory::File
    }
}
