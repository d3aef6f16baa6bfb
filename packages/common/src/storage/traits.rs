use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageError;
use super::key::AssetKey;

/// One object as reported by [`AssetStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: AssetKey,
    pub size: u64,
    /// Last write time, used to keep in-flight uploads out of orphan sweeps.
    pub modified_at: DateTime<Utc>,
}

/// Key-addressed binary storage.
///
/// Writes must be all-or-nothing from a reader's point of view: once `put` returns
/// `Ok`, `exists` and `get` observe the complete payload, and before that they observe
/// nothing.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &AssetKey,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Read the whole object.
    async fn get(&self, key: &AssetKey) -> Result<Vec<u8>, StorageError>;

    /// Delete an object.
    ///
    /// Returns `true` if something was removed, `false` if the key was already absent.
    /// A missing key is never an error.
    async fn delete(&self, key: &AssetKey) -> Result<bool, StorageError>;

    async fn exists(&self, key: &AssetKey) -> Result<bool, StorageError>;

    /// Every object currently in the store.
    async fn list(&self) -> Result<Vec<StoredObject>, StorageError>;

    /// Public URL of an object, for display layers.
    fn resolve_url(&self, key: &AssetKey) -> String;
}
