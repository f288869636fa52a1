//! Persistence hook for upload records.
//!
//! The engine calls `save` after every state transition; failures are
//! logged and never roll back the transition.

use async_trait::async_trait;

use crate::record::Upload;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, upload: &Upload) -> anyhow::Result<()>;
}

/// Default store for callers that persist records themselves.
pub struct NoOpRecordStore;

#[async_trait]
impl RecordStore for NoOpRecordStore {
    async fn save(&self, _upload: &Upload) -> anyhow::Result<()> {
        Ok(())
    }
}
