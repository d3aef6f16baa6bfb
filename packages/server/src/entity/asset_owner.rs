use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_owner")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Catalog kind (e.g. "article", "page_file").
    #[sea_orm(indexed)]
    pub kind: String,

    /// Owner whose deletion cascades to this row. Both set or both NULL.
    pub parent_kind: Option<String>,
    #[sea_orm(indexed)]
    pub parent_id: Option<Uuid>,
    /// Foreign key without cascade; a parent with surviving children cannot be deleted.
    #[sea_orm(self_ref, relation_enum = "Parent", from = "parent_id", to = "id")]
    pub parent: HasOne<Entity>,

    #[sea_orm(has_many)]
    pub asset_refs: HasMany<super::asset_ref::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
