use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::RwLock;

use crate::error::RepositoryError;
use crate::model::{AssetOwner, OwnerRef, SlotRef};
use crate::repository::RecordRepository;

/// A [`RecordRepository`] held in process memory.
///
/// Used by tests and by tools that run the lifecycle without a database.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: RwLock<HashMap<OwnerRef, AssetOwner>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn get_previous_version(
        &self,
        owner: &OwnerRef,
    ) -> Result<Option<AssetOwner>, RepositoryError> {
        Ok(self.rows.read().await.get(owner).cloned())
    }

    async fn children(&self, owner: &OwnerRef) -> Result<Vec<AssetOwner>, RepositoryError> {
        let rows = self.rows.read().await;
        let mut children: Vec<AssetOwner> = rows
            .values()
            .filter(|row| row.parent.as_ref() == Some(owner))
            .cloned()
            .collect();
        children.sort_by_key(|c| c.id);
        Ok(children)
    }

    async fn save(&self, owner: &AssetOwner) -> Result<AssetOwner, RepositoryError> {
        let mut rows = self.rows.write().await;
        if let Some(parent) = &owner.parent {
            if !rows.contains_key(parent) {
                return Err(RepositoryError::NotFound(parent.clone()));
            }
        }
        // Ids are unique across kinds, as in the relational schema.
        if rows.keys().any(|r| r.id == owner.id && r.kind != owner.kind) {
            return Err(RepositoryError::Conflict(owner.owner_ref()));
        }
        rows.insert(owner.owner_ref(), owner.clone());
        Ok(owner.clone())
    }

    async fn delete_tree(&self, owners: &[OwnerRef]) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().await;
        if let Some(stranded) = rows.values().find(|row| {
            row.parent.as_ref().is_some_and(|p| owners.contains(p))
                && !owners.contains(&row.owner_ref())
        }) {
            return Err(RepositoryError::WouldOrphan(stranded.owner_ref()));
        }
        let removed = owners.iter().filter(|o| rows.remove(*o).is_some()).count();
        Ok(removed as u64)
    }

    fn enumerate_all<'a>(
        &'a self,
        kind: &'a str,
    ) -> BoxStream<'a, Result<AssetOwner, RepositoryError>> {
        let snapshot = async move {
            let rows = self.rows.read().await;
            let mut owners: Vec<AssetOwner> =
                rows.values().filter(|o| o.kind == kind).cloned().collect();
            owners.sort_by_key(|o| o.id);
            stream::iter(owners.into_iter().map(Ok))
        };
        stream::once(snapshot).flatten().boxed()
    }

    fn enumerate_refs(&self) -> BoxStream<'_, Result<SlotRef, RepositoryError>> {
        let snapshot = async move {
            let rows = self.rows.read().await;
            let refs: Vec<SlotRef> = rows
                .values()
                .flat_map(|row| {
                    row.slots.iter().map(move |(slot, asset)| SlotRef {
                        owner: row.owner_ref(),
                        slot: slot.clone(),
                        asset: asset.clone(),
                    })
                })
                .collect();
            stream::iter(refs.into_iter().map(Ok))
        };
        stream::once(snapshot).flatten().boxed()
    }
}
