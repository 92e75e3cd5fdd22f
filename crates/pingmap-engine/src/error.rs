use pingmap_core::{BucketId, CoreError};
use pingmap_db::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request body could not be read as a probe batch.
    #[error(transparent)]
    Batch(#[from] CoreError),

    #[error("operation budget exhausted: {used} of {limit} storage calls used")]
    BudgetExceeded { used: usize, limit: usize },

    #[error("cell {bucket} still conflicting after {attempts} write attempts")]
    Conflict { bucket: BucketId, attempts: u32 },

    #[error("stored value under {key} is not a valid cell: {source}")]
    CorruptCell {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every bucket in the request failed against storage.
    #[error("storage unavailable: all {failed} bucket merges failed")]
    StorageUnavailable { failed: usize },
}

impl EngineError {
    /// Whether the failure came from the storage backend rather than from the
    /// request or the stored data.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StorageUnavailable { .. })
    }
}
