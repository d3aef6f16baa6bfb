use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RepositoryError;
use crate::model::{AssetOwner, OwnerRef, SlotRef};

/// The relational side of the lifecycle: owner rows and the asset references they hold.
///
/// Implementations persist an owner together with its slot references atomically; a
/// reader never sees a row whose references are half-written.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// The committed version of a row, read before a write changes it.
    async fn get_previous_version(
        &self,
        owner: &OwnerRef,
    ) -> Result<Option<AssetOwner>, RepositoryError>;

    /// Rows whose `parent` is `owner`. Direct children only.
    async fn children(&self, owner: &OwnerRef) -> Result<Vec<AssetOwner>, RepositoryError>;

    /// Insert or replace a row and its slot references in one unit.
    ///
    /// Fails with [`RepositoryError::NotFound`] when the row names a parent that does
    /// not exist, and with [`RepositoryError::Conflict`] when its id already belongs to
    /// a row of another kind.
    async fn save(&self, owner: &AssetOwner) -> Result<AssetOwner, RepositoryError>;

    /// Delete every listed row and its references in one unit. Rows that are already
    /// gone are skipped. Returns how many rows were removed.
    ///
    /// Fails with [`RepositoryError::WouldOrphan`], deleting nothing, if an unlisted row
    /// names one of the listed rows as its parent.
    async fn delete_tree(&self, owners: &[OwnerRef]) -> Result<u64, RepositoryError>;

    /// Every committed row of `kind`, streamed.
    fn enumerate_all<'a>(
        &'a self,
        kind: &'a str,
    ) -> BoxStream<'a, Result<AssetOwner, RepositoryError>>;

    /// Every filled slot of every committed row, whatever its kind, streamed.
    ///
    /// Kinds that are no longer configured still hold live references, so this must not
    /// be narrowed by any catalog.
    fn enumerate_refs(&self) -> BoxStream<'_, Result<SlotRef, RepositoryError>>;
}
