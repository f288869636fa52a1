//! Attache Core Library
//!
//! This crate provides the configuration types, file classification rules,
//! cache-directory management, and integration hooks shared by the attache
//! storage and upload crates.

pub mod cache;
pub mod config;
pub mod constants;
pub mod hooks;
pub mod media;

// Re-export commonly used types
pub use cache::{CacheDir, CacheError};
pub use config::{AttacheConfig, BackendSettings, CacheSettings, StorageProvider};
pub use hooks::{PostCacheHook, UploadSnapshot, Validate};
pub use media::{
    content_type_for, file_category_for, is_audio_file, is_image_file, is_video_file, FileCategory,
};
