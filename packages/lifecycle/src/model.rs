use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use common::storage::{AssetKey, Checksum};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of an owner row. Stable for the row's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// A fresh time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for OwnerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifies one owner row: its kind plus its primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: OwnerId,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, id: OwnerId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Whether a slot's payload is run through image normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Document,
    Other,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference from an owner row to one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Minted once per payload version; never reused.
    pub key: AssetKey,
    /// Filename the uploader supplied, kept for display only.
    pub original_name: String,
    pub content_kind: ContentKind,
    pub content_type: Option<String>,
    /// Size of the stored object, after normalization.
    pub size: u64,
    /// Checksum of the upload as received, before normalization.
    pub checksum: Checksum,
}

/// A row that owns stored objects.
///
/// `slots` only holds filled slots; an empty slot is simply absent. `parent` links a
/// child row (an article image, a page file) to the owner whose deletion cascades to
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOwner {
    pub kind: String,
    pub id: OwnerId,
    pub parent: Option<OwnerRef>,
    pub slots: BTreeMap<String, AssetRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetOwner {
    /// A new, not yet committed owner with no assets.
    pub fn new(kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.into(),
            id: OwnerId::new(),
            parent: None,
            slots: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent: OwnerRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self.kind.clone(), self.id)
    }

    pub fn asset(&self, slot: &str) -> Option<&AssetRef> {
        self.slots.get(slot)
    }

    /// Every key this row references, in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.slots.values().map(|r| &r.key)
    }
}

/// One filled slot of a committed row, as seen by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    pub owner: OwnerRef,
    pub slot: String,
    pub asset: AssetRef,
}

/// An incoming file for one slot.
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// What a write does to one slot. Slots not mentioned in a write are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotChange {
    Replace(Upload),
    Clear,
}
