//! Owner kinds and their asset slots.
//!
//! Each record kind that owns files is described once here instead of carrying its
//! own copy of the upload/replace/delete logic.

use std::collections::BTreeMap;

use common::storage::AssetKey;
use serde::Deserialize;

use crate::error::LifecycleError;
use crate::model::ContentKind;

/// One named attachment point on an owner kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub content_kind: ContentKind,
    /// Must hold an asset once the owner is committed.
    #[serde(default)]
    pub required: bool,
    /// Key prefix for this slot's objects. Defaults to `{kind}/{slot}`.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Lowercase extensions without the dot. `None` accepts any.
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
}

impl SlotSpec {
    pub fn new(name: &str, content_kind: ContentKind) -> Self {
        Self {
            name: name.to_string(),
            content_kind,
            required: false,
            namespace: None,
            allowed_extensions: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = Some(extensions.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn allows_extension(&self, ext: Option<&str>) -> bool {
        match (&self.allowed_extensions, ext) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(allowed), Some(ext)) => allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)),
        }
    }
}

/// A record kind that owns assets, and the kinds whose rows it owns in turn.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnerKindSpec {
    pub name: String,
    #[serde(default)]
    pub slots: Vec<SlotSpec>,
    /// Kinds that may be created with an owner of this kind as parent.
    #[serde(default)]
    pub children: Vec<String>,
    /// A kind listed as someone's child may still be created without a parent.
    #[serde(default)]
    pub standalone: bool,
}

impl OwnerKindSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slots: Vec::new(),
            children: Vec::new(),
            standalone: false,
        }
    }

    pub fn slot(mut self, slot: SlotSpec) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    pub fn child(mut self, kind: &str) -> Self {
        self.children.push(kind.to_string());
        self
    }

    pub fn find_slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Key prefix for a slot: the slot's own namespace, or `{kind}/{slot}`.
    pub fn namespace_for(&self, slot: &SlotSpec) -> String {
        slot.namespace
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.name, slot.name))
    }
}

/// The set of owner kinds the manager knows about.
#[derive(Debug, Clone, Default)]
pub struct OwnerCatalog {
    kinds: BTreeMap<String, OwnerKindSpec>,
}

impl OwnerCatalog {
    /// Build a catalog, checking that slot names are unique per kind, that every slot
    /// namespace is a valid key prefix and that every listed child kind exists.
    pub fn new(kinds: impl IntoIterator<Item = OwnerKindSpec>) -> Result<Self, LifecycleError> {
        let mut map = BTreeMap::new();
        for kind in kinds {
            let mut seen = std::collections::HashSet::new();
            for slot in &kind.slots {
                if !seen.insert(slot.name.as_str()) {
                    return Err(LifecycleError::validation(format!(
                        "kind '{}' declares slot '{}' twice",
                        kind.name, slot.name
                    )));
                }
                let namespace = kind.namespace_for(slot);
                if let Err(e) = AssetKey::parse(&namespace) {
                    return Err(LifecycleError::validation(format!(
                        "slot '{}.{}' has unusable namespace '{namespace}': {e}",
                        kind.name, slot.name
                    )));
                }
            }
            let name = kind.name.clone();
            if map.insert(name.clone(), kind).is_some() {
                return Err(LifecycleError::validation(format!(
                    "kind '{name}' declared twice"
                )));
            }
        }

        for kind in map.values() {
            if let Some(missing) = kind.children.iter().find(|c| !map.contains_key(*c)) {
                return Err(LifecycleError::validation(format!(
                    "kind '{}' lists unknown child kind '{missing}'",
                    kind.name
                )));
            }
        }

        Ok(Self { kinds: map })
    }

    /// The kinds and slots of the content site: slides, media files, news articles
    /// with their images and attachments, news/event images, pages with their
    /// images and downloadable files, and user photos.
    pub fn content_site() -> Self {
        let image = ContentKind::Image;
        let document = ContentKind::Document;

        let kinds = vec![
            OwnerKindSpec::new("slide").slot(SlotSpec::new("image", image).namespace("app/slides")),
            OwnerKindSpec::new("media_file").slot(
                SlotSpec::new("file", ContentKind::Other)
                    .required()
                    .namespace("mediafiles"),
            ),
            OwnerKindSpec::new("article")
                .slot(SlotSpec::new("cover", image).namespace("news/covers"))
                .child("article_image")
                .child("article_attachment"),
            OwnerKindSpec::new("article_image").slot(
                SlotSpec::new("image", image)
                    .required()
                    .namespace("news/images"),
            ),
            OwnerKindSpec::new("article_attachment").slot(
                SlotSpec::new("file", document)
                    .required()
                    .namespace("news/attachments"),
            ),
            OwnerKindSpec::new("news").child("news_event_image"),
            OwnerKindSpec::new("event").child("news_event_image"),
            OwnerKindSpec::new("news_event_image")
                .standalone()
                .slot(
                    SlotSpec::new("image", image)
                        .required()
                        .namespace("news_event/images"),
                ),
            OwnerKindSpec::new("page").child("page_image").child("page_file"),
            OwnerKindSpec::new("page_image").slot(
                SlotSpec::new("image", image)
                    .required()
                    .namespace("pages/images")
                    .extensions(&["jpg", "jpeg", "png", "gif"]),
            ),
            OwnerKindSpec::new("page_file").slot(
                SlotSpec::new("file", document)
                    .required()
                    .namespace("pages/files")
                    .extensions(&["pdf", "docx", "xlsx"]),
            ),
            OwnerKindSpec::new("user")
                .slot(SlotSpec::new("photo", image).namespace("photos/users")),
        ];

        match Self::new(kinds) {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("built-in catalog is inconsistent: {e}"),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&OwnerKindSpec> {
        self.kinds.get(kind)
    }

    pub fn require(&self, kind: &str) -> Result<&OwnerKindSpec, LifecycleError> {
        self.get(kind)
            .ok_or_else(|| LifecycleError::validation(format!("unknown owner kind '{kind}'")))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &OwnerKindSpec> {
        self.kinds.values()
    }
}
