//! Error types for the upload lifecycle.
//!
//! Processing failures (validation, transforms, store attempts) are captured
//! in the upload's error log and surfaced through the `Error` state; the
//! variants here cover misuse and explicit best-effort calls only.

use thiserror::Error;

use attache_core::CacheError;
use attache_storage::StorageError;

use crate::record::UploadState;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot reprocess the reserved original style")]
    ReprocessOriginal,

    #[error("original is a reserved style name")]
    ReservedStyle,

    #[error("unknown style: {0}")]
    UnknownStyle(String),

    #[error("style has no usable data: {0}")]
    MissingStyleData(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("{op} is not valid in state {state}")]
    InvalidState {
        op: &'static str,
        state: UploadState,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
