//! Attache Upload Library
//!
//! The upload lifecycle state machine: an [`Upload`] record tracks one
//! original file plus any number of named derived styles, and the
//! [`Uploader`] engine drives it through cache → process → store, with
//! reprocessing and deletion on top of the storage registry.

pub mod error;
pub mod persist;
pub mod record;
pub mod source;
pub mod style;
pub mod uploader;

// Re-export commonly used types
pub use error::UploadError;
pub use persist::{NoOpRecordStore, RecordStore};
pub use record::{OwnerRef, StyleRecord, Upload, UploadState};
pub use source::UploadSource;
pub use style::{FnStyle, StyleRegistry, StyleTransform, TransformContext};
pub use uploader::{Uploader, STORE_ATTEMPTS};
