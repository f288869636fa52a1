//! Attache Storage Library
//!
//! This crate provides the storage abstraction shared by every attache
//! backend: the [`Storage`] and [`StorageObject`] traits, the Local, S3 and
//! Swift implementations, and the [`StorageRegistry`] of named backends.
//!
//! # Storage keys
//!
//! Keys are relative paths within a backend's container (bucket, Swift
//! container, or local subdirectory), e.g. `original/photo.jpg`. Keys must
//! not contain `..` or a leading `/`; validation is centralized in the
//! `keys` module so all backends stay consistent.

pub(crate) mod keys;
pub mod local;
pub mod registry;
#[cfg(feature = "storage-s3")]
pub mod s3;
#[cfg(feature = "storage-swift")]
pub mod swift;
pub mod traits;

// Re-export commonly used types
pub use attache_core::StorageProvider;
pub use local::LocalStorage;
pub use registry::StorageRegistry;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
#[cfg(feature = "storage-swift")]
pub use swift::SwiftStorage;
pub use traits::{ByteChunks, Storage, StorageError, StorageObject, StorageResult};
