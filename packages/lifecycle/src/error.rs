use common::storage::{AssetKey, StorageError};
use thiserror::Error;

use crate::model::OwnerRef;

/// Failures from a [`RecordRepository`](crate::RecordRepository) backend.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Owner not found: {0}")]
    NotFound(OwnerRef),

    #[error("Owner already exists: {0}")]
    Conflict(OwnerRef),

    /// A delete would leave this row pointing at a parent that no longer exists.
    #[error("Deleting would leave {0} without its parent")]
    WouldOrphan(OwnerRef),

    #[error("Repository backend error: {0}")]
    Backend(String),
}

/// Fatal outcome of a lifecycle operation. Nothing was committed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The write was rejected before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Owner not found: {0}")]
    NotFound(OwnerRef),

    /// Storing a new payload failed, so the row was not written.
    #[error("Failed to store '{key}': {source}")]
    Store {
        key: AssetKey,
        #[source]
        source: StorageError,
    },

    /// The store could not be listed or queried as a whole.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Non-fatal conditions reported alongside a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteWarning {
    /// An image slot's payload could not be decoded and was stored as received.
    Decode { slot: String, message: String },
}
