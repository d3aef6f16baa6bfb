use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_ref")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique_key = "owner_slot")]
    pub owner_id: Uuid,
    #[sea_orm(belongs_to, from = "owner_id", to = "id")]
    pub owner: HasOne<super::asset_owner::Entity>,

    #[sea_orm(unique_key = "owner_slot")]
    pub slot: String,

    /// Keys are never shared between refs.
    #[sea_orm(unique)]
    pub storage_key: String,

    /// Uploader-supplied filename, display only.
    pub original_name: String,
    /// One of: image, document, other.
    pub content_kind: String,
    pub content_type: Option<String>,
    pub size: i64,
    /// SHA-256 of the upload as received, hex.
    pub checksum: String,
}

impl ActiveModelBehavior for ActiveModel {}
