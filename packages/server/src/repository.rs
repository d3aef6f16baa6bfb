use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use common::storage::{AssetKey, Checksum};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use lifecycle::{
    AssetOwner, AssetRef, ContentKind, OwnerId, OwnerRef, RecordRepository, RepositoryError,
    SlotRef,
};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::entity::{asset_owner, asset_ref};

/// Rows fetched per query when streaming owners for a sweep.
pub const DEFAULT_PAGE_SIZE: u64 = 500;

/// [`RecordRepository`] over the `asset_owner` and `asset_ref` tables.
///
/// An owner and its refs are always written and deleted in one transaction.
#[derive(Clone)]
pub struct SeaOrmRepository {
    db: DatabaseConnection,
    page_size: u64,
}

impl SeaOrmRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// One page of `kind`, ordered by id, strictly after `after`.
    async fn page(&self, kind: &str, after: Option<Uuid>) -> Result<Vec<AssetOwner>, RepositoryError> {
        let mut query = asset_owner::Entity::find().filter(asset_owner::Column::Kind.eq(kind));
        if let Some(after) = after {
            query = query.filter(asset_owner::Column::Id.gt(after));
        }
        let rows = query
            .order_by_asc(asset_owner::Column::Id)
            .limit(Some(self.page_size))
            .all(&self.db)
            .await
            .map_err(db_err)?;

        hydrate(&self.db, rows).await
    }

    /// One page of refs across all owners, ordered by ref id, strictly after `after`.
    ///
    /// Returns the refs whose owner is still present, and the id to resume after, or
    /// `None` when this was the last page.
    async fn ref_page(
        &self,
        after: Option<Uuid>,
    ) -> Result<(Vec<SlotRef>, Option<Uuid>), RepositoryError> {
        let mut query = asset_ref::Entity::find();
        if let Some(after) = after {
            query = query.filter(asset_ref::Column::Id.gt(after));
        }
        let refs = query
            .order_by_asc(asset_ref::Column::Id)
            .limit(Some(self.page_size))
            .all(&self.db)
            .await
            .map_err(db_err)?;
        let resume = if (refs.len() as u64) < self.page_size {
            None
        } else {
            refs.last().map(|r| r.id)
        };

        let owner_ids: Vec<Uuid> = refs.iter().map(|r| r.owner_id).collect();
        let kinds: HashMap<Uuid, String> = asset_owner::Entity::find()
            .filter(asset_owner::Column::Id.is_in(owner_ids))
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|row| (row.id, row.kind))
            .collect();

        let mut page = Vec::with_capacity(refs.len());
        for r in refs {
            // Deleted between the two reads.
            let Some(kind) = kinds.get(&r.owner_id) else {
                continue;
            };
            let owner = OwnerRef::new(kind.clone(), OwnerId(r.owner_id));
            let slot = r.slot.clone();
            page.push(SlotRef {
                owner,
                slot,
                asset: to_asset_ref(r)?,
            });
        }
        Ok((page, resume))
    }
}

#[async_trait]
impl RecordRepository for SeaOrmRepository {
    async fn get_previous_version(
        &self,
        owner: &OwnerRef,
    ) -> Result<Option<AssetOwner>, RepositoryError> {
        let row = asset_owner::Entity::find_by_id(owner.id.0)
            .filter(asset_owner::Column::Kind.eq(&owner.kind))
            .one(&self.db)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(hydrate(&self.db, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn children(&self, owner: &OwnerRef) -> Result<Vec<AssetOwner>, RepositoryError> {
        let rows = asset_owner::Entity::find()
            .filter(asset_owner::Column::ParentKind.eq(&owner.kind))
            .filter(asset_owner::Column::ParentId.eq(owner.id.0))
            .order_by_asc(asset_owner::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        hydrate(&self.db, rows).await
    }

    async fn save(&self, owner: &AssetOwner) -> Result<AssetOwner, RepositoryError> {
        let txn = self.db.begin().await.map_err(db_err)?;

        // The id is the primary key on its own; it must not move to another kind.
        let existing = asset_owner::Entity::find_by_id(owner.id.0)
            .one(&txn)
            .await
            .map_err(db_err)?;
        if existing.is_some_and(|row| row.kind != owner.kind) {
            txn.rollback().await.map_err(db_err)?;
            return Err(RepositoryError::Conflict(owner.owner_ref()));
        }

        if let Some(parent) = &owner.parent {
            let exists = asset_owner::Entity::find_by_id(parent.id.0)
                .filter(asset_owner::Column::Kind.eq(&parent.kind))
                .one(&txn)
                .await
                .map_err(db_err)?;
            if exists.is_none() {
                txn.rollback().await.map_err(db_err)?;
                return Err(RepositoryError::NotFound(parent.clone()));
            }
        }

        let row = asset_owner::ActiveModel {
            id: Set(owner.id.0),
            kind: Set(owner.kind.clone()),
            parent_kind: Set(owner.parent.as_ref().map(|p| p.kind.clone())),
            parent_id: Set(owner.parent.as_ref().map(|p| p.id.0)),
            created_at: Set(owner.created_at),
            updated_at: Set(owner.updated_at),
        };
        asset_owner::Entity::insert(row)
            .on_conflict(
                OnConflict::column(asset_owner::Column::Id)
                    .update_columns([
                        asset_owner::Column::ParentKind,
                        asset_owner::Column::ParentId,
                        asset_owner::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await
            .map_err(|e| parent_gone(e, owner))?;

        // Refs are replaced wholesale; the slot map is small.
        asset_ref::Entity::delete_many()
            .filter(asset_ref::Column::OwnerId.eq(owner.id.0))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        let refs: Vec<asset_ref::ActiveModel> = owner
            .slots
            .iter()
            .map(|(slot, asset)| asset_ref::ActiveModel {
                id: Set(Uuid::now_v7()),
                owner_id: Set(owner.id.0),
                slot: Set(slot.clone()),
                storage_key: Set(asset.key.as_str().to_string()),
                original_name: Set(asset.original_name.clone()),
                content_kind: Set(asset.content_kind.as_str().to_string()),
                content_type: Set(asset.content_type.clone()),
                size: Set(i64::try_from(asset.size).unwrap_or(i64::MAX)),
                checksum: Set(asset.checksum.to_hex()),
            })
            .collect();
        if !refs.is_empty() {
            asset_ref::Entity::insert_many(refs)
                .exec_without_returning(&txn)
                .await
                .map_err(db_err)?;
        }

        txn.commit().await.map_err(|e| parent_gone(e, owner))?;
        debug!(owner = %owner.owner_ref(), slots = owner.slots.len(), "Saved owner");

        Ok(owner.clone())
    }

    async fn delete_tree(&self, owners: &[OwnerRef]) -> Result<u64, RepositoryError> {
        if owners.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = owners.iter().map(|o| o.id.0).collect();

        let txn = self.db.begin().await.map_err(db_err)?;

        let stranded = asset_owner::Entity::find()
            .filter(asset_owner::Column::ParentId.is_in(ids.clone()))
            .filter(asset_owner::Column::Id.is_not_in(ids.clone()))
            .one(&txn)
            .await
            .map_err(db_err)?;
        if let Some(child) = stranded {
            txn.rollback().await.map_err(db_err)?;
            return Err(RepositoryError::WouldOrphan(OwnerRef::new(
                child.kind,
                OwnerId(child.id),
            )));
        }

        asset_ref::Entity::delete_many()
            .filter(asset_ref::Column::OwnerId.is_in(ids.clone()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        // A child committed after the check above still trips the foreign key.
        let result = asset_owner::Entity::delete_many()
            .filter(asset_owner::Column::Id.is_in(ids))
            .exec(&txn)
            .await
            .map_err(|e| child_remains(e, owners))?;
        txn.commit().await.map_err(|e| child_remains(e, owners))?;

        Ok(result.rows_affected)
    }

    fn enumerate_all<'a>(
        &'a self,
        kind: &'a str,
    ) -> BoxStream<'a, Result<AssetOwner, RepositoryError>> {
        // State: `None` once the last page has been read, else the id to resume after.
        stream::try_unfold(Some(None::<Uuid>), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok(None);
            };
            let page = self.page(kind, after).await?;
            let next = if (page.len() as u64) < self.page_size {
                None
            } else {
                page.last().map(|o| Some(o.id.0))
            };
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, RepositoryError>)))
        .try_flatten()
        .boxed()
    }

    fn enumerate_refs(&self) -> BoxStream<'_, Result<SlotRef, RepositoryError>> {
        stream::try_unfold(Some(None::<Uuid>), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok(None);
            };
            let (page, resume) = self.ref_page(after).await?;
            let next = resume.map(Some);
            Ok(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, RepositoryError>)))
        .try_flatten()
        .boxed()
    }
}

/// Attach each row's refs with a single query.
async fn hydrate<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<asset_owner::Model>,
) -> Result<Vec<AssetOwner>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut refs: HashMap<Uuid, Vec<asset_ref::Model>> = HashMap::new();
    for r in asset_ref::Entity::find()
        .filter(asset_ref::Column::OwnerId.is_in(ids))
        .all(conn)
        .await
        .map_err(db_err)?
    {
        refs.entry(r.owner_id).or_default().push(r);
    }

    rows.into_iter()
        .map(|row| {
            let owned = refs.remove(&row.id).unwrap_or_default();
            to_domain(row, owned)
        })
        .collect()
}

fn to_domain(
    row: asset_owner::Model,
    refs: Vec<asset_ref::Model>,
) -> Result<AssetOwner, RepositoryError> {
    let parent = match (row.parent_kind, row.parent_id) {
        (Some(kind), Some(id)) => Some(OwnerRef::new(kind, OwnerId(id))),
        _ => None,
    };

    let mut slots = BTreeMap::new();
    for r in refs {
        let slot = r.slot.clone();
        slots.insert(slot, to_asset_ref(r)?);
    }

    Ok(AssetOwner {
        kind: row.kind,
        id: OwnerId(row.id),
        parent,
        slots,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn to_asset_ref(r: asset_ref::Model) -> Result<AssetRef, RepositoryError> {
    let key = AssetKey::parse(&r.storage_key).map_err(|e| corrupt(&r, e))?;
    let checksum = Checksum::from_hex(&r.checksum).map_err(|e| corrupt(&r, e))?;
    let content_kind = ContentKind::parse(&r.content_kind)
        .ok_or_else(|| corrupt(&r, format!("unknown content kind '{}'", r.content_kind)))?;

    Ok(AssetRef {
        key,
        original_name: r.original_name,
        content_kind,
        content_type: r.content_type,
        size: u64::try_from(r.size).unwrap_or(0),
        checksum,
    })
}

fn corrupt(r: &asset_ref::Model, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Backend(format!("asset_ref {} is unreadable: {e}", r.id))
}

fn db_err(e: DbErr) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

/// The parent was deleted after the existence check but before this row landed.
fn parent_gone(e: DbErr, owner: &AssetOwner) -> RepositoryError {
    match (e.sql_err(), &owner.parent) {
        (Some(SqlErr::ForeignKeyConstraintViolation(_)), Some(parent)) => {
            RepositoryError::NotFound(parent.clone())
        }
        _ => db_err(e),
    }
}

/// A child was inserted under one of `owners` after the subtree was collected.
fn child_remains(e: DbErr, owners: &[OwnerRef]) -> RepositoryError {
    match (e.sql_err(), owners.last()) {
        (Some(SqlErr::ForeignKeyConstraintViolation(_)), Some(root)) => {
            RepositoryError::WouldOrphan(root.clone())
        }
        _ => db_err(e),
    }
}
