//! Shared constants used across the attache crates.

/// Style name reserved for the ingested file itself.
pub const ORIGINAL_STYLE: &str = "original";

/// Backend name reserved for the ephemeral cache store.
pub const CACHE_BACKEND_NAME: &str = "cache";

/// Alias accepted by the registry for the primary backend.
pub const PRIMARY_BACKEND_ALIAS: &str = "primary";

/// Content type reported when the resolver cannot classify a filename.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions classified as video regardless of what MIME data claims.
/// Several providers under-report video content types, so classification
/// falls back to this allow-list.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mov", ".3gp", ".wmv", ".m4v", ".mp4", ".flv"];

/// Default scratch subdirectory under the cache root.
pub const DEFAULT_CACHE_DIRECTORY: &str = "uploads";

/// Default maximum age for scratch files, in seconds.
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 24 * 3600;
