//! The write path: creating, updating and deleting owners that hold stored assets.
//!
//! Ordering is what keeps rows and store consistent:
//!
//! 1. validate everything before touching the store,
//! 2. store new payloads under freshly minted keys,
//! 3. commit the row,
//! 4. purge keys the row no longer references.
//!
//! A crash or a failure anywhere in between leaves at worst an unreferenced object,
//! which the [`OrphanSweeper`](crate::OrphanSweeper) removes. A committed row never
//! references a key whose object has not been stored.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use common::storage::{AssetKey, AssetStore, Checksum};
use tracing::{debug, error, info, instrument, warn};

use crate::backlog::{PurgeBacklog, PurgeDecision};
use crate::catalog::{OwnerCatalog, OwnerKindSpec, SlotSpec};
use crate::error::{LifecycleError, RepositoryError, WriteWarning};
use crate::model::{AssetOwner, AssetRef, ContentKind, OwnerRef, SlotChange, Upload};
use crate::normalize::{ImageNormalizer, Normalized};
use crate::path::{PathGenerator, normalized_extension, validate_filename};
use crate::repository::RecordRepository;

/// Largest payload accepted when no limit is configured.
pub const DEFAULT_MAX_ASSET_SIZE: u64 = 64 * 1024 * 1024;

/// Progress of a single create or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WritePhase {
    Pending,
    Validated,
    Normalized,
    /// Row written; nothing needed purging.
    Committed,
    /// Row written and every replaced or cleared key deleted.
    OldAssetPurged,
    /// Row written but at least one old key is left for the sweeper.
    PurgeDeferred,
}

impl WritePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Normalized => "normalized",
            Self::Committed => "committed",
            Self::OldAssetPurged => "old_asset_purged",
            Self::PurgeDeferred => "purge_deferred",
        }
    }
}

impl fmt::Display for WritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful create or update.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// The row as committed.
    pub owner: AssetOwner,
    /// Terminal phase: `Committed`, `OldAssetPurged` or `PurgeDeferred`.
    pub phase: WritePhase,
    pub warnings: Vec<WriteWarning>,
    pub purged_keys: Vec<AssetKey>,
    /// Old keys that could not be deleted and were handed to the purge backlog.
    pub deferred_purges: Vec<AssetKey>,
}

/// Result of deleting an owner and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The owner and every descendant, children before parents.
    pub removed_owners: Vec<OwnerRef>,
    pub purged_keys: Vec<AssetKey>,
    pub deferred_purges: Vec<AssetKey>,
}

/// An upload that passed validation and is ready to store.
struct PreparedUpload {
    slot: String,
    content_kind: ContentKind,
    namespace: String,
    original_name: String,
    content_type: Option<String>,
    checksum: Checksum,
    data: Vec<u8>,
}

#[derive(Default)]
struct PurgeSummary {
    purged: Vec<AssetKey>,
    deferred: Vec<AssetKey>,
}

/// Orchestrates the asset side of owner writes for every kind in an [`OwnerCatalog`].
///
/// Safe to share across tasks. Writes to different owners may run concurrently; writes
/// to the same owner should be serialized by the caller. If they are not, the loser's
/// new key ends up unreferenced and is removed by the next sweep.
pub struct AssetLifecycleManager {
    catalog: Arc<OwnerCatalog>,
    store: Arc<dyn AssetStore>,
    repo: Arc<dyn RecordRepository>,
    paths: Arc<PathGenerator>,
    normalizer: ImageNormalizer,
    backlog: PurgeBacklog,
    max_asset_size: u64,
}

impl AssetLifecycleManager {
    pub fn new(
        catalog: Arc<OwnerCatalog>,
        store: Arc<dyn AssetStore>,
        repo: Arc<dyn RecordRepository>,
    ) -> Self {
        Self {
            catalog,
            store,
            repo,
            paths: Arc::new(PathGenerator::new()),
            normalizer: ImageNormalizer::default(),
            backlog: PurgeBacklog::default(),
            max_asset_size: DEFAULT_MAX_ASSET_SIZE,
        }
    }

    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_path_generator(mut self, paths: PathGenerator) -> Self {
        self.paths = Arc::new(paths);
        self
    }

    /// Share a backlog with the sweeper so deferred purges get retried.
    pub fn with_backlog(mut self, backlog: PurgeBacklog) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_asset_size(mut self, max_asset_size: u64) -> Self {
        self.max_asset_size = max_asset_size;
        self
    }

    pub fn catalog(&self) -> &OwnerCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn RecordRepository> {
        &self.repo
    }

    pub fn backlog(&self) -> &PurgeBacklog {
        &self.backlog
    }

    /// Store the payloads of a new owner and commit it.
    ///
    /// `owner` carries the kind, id and parent; its slots must be empty because
    /// references are only ever minted here.
    #[instrument(skip(self, owner, uploads), fields(owner_kind = %owner.kind, owner_id = %owner.id))]
    pub async fn on_create(
        &self,
        owner: AssetOwner,
        uploads: BTreeMap<String, Upload>,
    ) -> Result<WriteOutcome, LifecycleError> {
        let phase = WritePhase::Pending;
        let kind = self.catalog.require(&owner.kind)?;

        if !owner.slots.is_empty() {
            return Err(LifecycleError::validation(
                "a new owner must not carry asset references; pass payloads instead",
            ));
        }
        self.check_parent(kind, owner.parent.as_ref()).await?;

        let owner_ref = owner.owner_ref();
        if self.repo.get_previous_version(&owner_ref).await?.is_some() {
            return Err(RepositoryError::Conflict(owner_ref).into());
        }

        if let Some(missing) = kind
            .slots
            .iter()
            .find(|s| s.required && !uploads.contains_key(&s.name))
        {
            return Err(LifecycleError::validation(format!(
                "slot '{}' of '{}' is required",
                missing.name, kind.name
            )));
        }

        let mut prepared = Vec::with_capacity(uploads.len());
        for (slot_name, upload) in uploads {
            let slot = find_slot(kind, &slot_name)?;
            prepared.push(self.validate_upload(kind, slot, upload)?);
        }
        let phase = advance(phase, WritePhase::Validated);

        let mut warnings = Vec::new();
        let prepared = self.normalize_all(prepared, &mut warnings).await?;
        let phase = advance(phase, WritePhase::Normalized);

        let stored = self.store_all(prepared).await?;
        let minted: Vec<AssetKey> = stored.iter().map(|(_, a)| a.key.clone()).collect();

        let mut next = owner;
        next.slots.extend(stored);
        let now = Utc::now();
        next.created_at = now;
        next.updated_at = now;

        let committed = self.commit(&next, &minted).await?;
        let phase = advance(phase, WritePhase::Committed);

        info!(slots = committed.slots.len(), "Owner created");

        Ok(WriteOutcome {
            owner: committed,
            phase,
            warnings,
            purged_keys: Vec::new(),
            deferred_purges: Vec::new(),
        })
    }

    /// Apply slot changes to an existing owner.
    ///
    /// Slots not named in `changes` keep their reference. A replacement whose bytes
    /// match the stored checksum keeps the current key. Replaced and cleared keys are
    /// purged only after the row commits; a purge failure is logged and deferred, never
    /// returned as an error.
    #[instrument(skip(self, changes), fields(owner_kind = %owner.kind, owner_id = %owner.id))]
    pub async fn on_update(
        &self,
        owner: &OwnerRef,
        changes: BTreeMap<String, SlotChange>,
    ) -> Result<WriteOutcome, LifecycleError> {
        let phase = WritePhase::Pending;
        let kind = self.catalog.require(&owner.kind)?;

        let previous = self
            .repo
            .get_previous_version(owner)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(owner.clone()))?;

        let mut uploads = Vec::new();
        let mut clears = Vec::new();
        let mut renames = Vec::new();

        for (slot_name, change) in changes {
            let slot = find_slot(kind, &slot_name)?;
            match change {
                SlotChange::Clear => {
                    if slot.required {
                        return Err(LifecycleError::validation(format!(
                            "slot '{}' of '{}' is required and cannot be cleared",
                            slot.name, kind.name
                        )));
                    }
                    if previous.slots.contains_key(&slot_name) {
                        clears.push(slot_name);
                    }
                }
                SlotChange::Replace(upload) => {
                    let prepared = self.validate_upload(kind, slot, upload)?;
                    match previous.asset(&slot_name) {
                        Some(current) if current.checksum == prepared.checksum => {
                            debug!(slot = %slot_name, key = %current.key, "Payload unchanged, keeping key");
                            if current.original_name != prepared.original_name {
                                renames.push((slot_name, prepared.original_name));
                            }
                        }
                        _ => uploads.push(prepared),
                    }
                }
            }
        }
        let phase = advance(phase, WritePhase::Validated);

        if uploads.is_empty() && clears.is_empty() && renames.is_empty() {
            debug!("No asset changes");
            return Ok(WriteOutcome {
                owner: previous,
                phase: WritePhase::Committed,
                warnings: Vec::new(),
                purged_keys: Vec::new(),
                deferred_purges: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let uploads = self.normalize_all(uploads, &mut warnings).await?;
        let phase = advance(phase, WritePhase::Normalized);

        let stored = self.store_all(uploads).await?;
        let minted: Vec<AssetKey> = stored.iter().map(|(_, a)| a.key.clone()).collect();

        let mut next = previous;
        let mut to_purge = Vec::new();
        for (slot, asset) in stored {
            if let Some(old) = next.slots.insert(slot, asset) {
                to_purge.push(old.key);
            }
        }
        for slot in clears {
            if let Some(old) = next.slots.remove(&slot) {
                to_purge.push(old.key);
            }
        }
        for (slot, name) in renames {
            if let Some(asset) = next.slots.get_mut(&slot) {
                asset.original_name = name;
            }
        }
        next.updated_at = Utc::now();

        let committed = self.commit(&next, &minted).await?;
        let phase = advance(phase, WritePhase::Committed);

        let summary = self.purge(&to_purge).await;
        let phase = if to_purge.is_empty() {
            phase
        } else if summary.deferred.is_empty() {
            advance(phase, WritePhase::OldAssetPurged)
        } else {
            advance(phase, WritePhase::PurgeDeferred)
        };

        info!(
            stored = minted.len(),
            purged = summary.purged.len(),
            deferred = summary.deferred.len(),
            "Owner updated"
        );

        Ok(WriteOutcome {
            owner: committed,
            phase,
            warnings,
            purged_keys: summary.purged,
            deferred_purges: summary.deferred,
        })
    }

    /// Delete an owner, every owner below it, and every key any of them reference.
    ///
    /// The subtree is enumerated before the rows are deleted and keys are purged only
    /// after the delete commits.
    #[instrument(skip(self), fields(owner_kind = %owner.kind, owner_id = %owner.id))]
    pub async fn on_delete(&self, owner: &OwnerRef) -> Result<DeleteOutcome, LifecycleError> {
        let root = self
            .repo
            .get_previous_version(owner)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(owner.clone()))?;

        let (owners, keys) = self.collect_subtree(root).await?;

        let removed = self.repo.delete_tree(&owners).await?;
        if removed as usize != owners.len() {
            debug!(
                expected = owners.len(),
                removed, "Some rows were already gone"
            );
        }

        let summary = self.purge(&keys).await;

        info!(
            owners = owners.len(),
            purged = summary.purged.len(),
            deferred = summary.deferred.len(),
            "Owner deleted"
        );

        Ok(DeleteOutcome {
            removed_owners: owners,
            purged_keys: summary.purged,
            deferred_purges: summary.deferred,
        })
    }

    /// Child kinds may only be created under a parent kind that lists them, and the
    /// parent row must already exist. Standalone kinds may also have no parent.
    async fn check_parent(
        &self,
        kind: &OwnerKindSpec,
        parent: Option<&OwnerRef>,
    ) -> Result<(), LifecycleError> {
        let parent_kinds: Vec<&str> = self
            .catalog
            .kinds()
            .filter(|k| k.children.iter().any(|c| *c == kind.name))
            .map(|k| k.name.as_str())
            .collect();

        let Some(parent) = parent else {
            if parent_kinds.is_empty() || kind.standalone {
                return Ok(());
            }
            return Err(LifecycleError::validation(format!(
                "'{}' must be created under one of: {}",
                kind.name,
                parent_kinds.join(", ")
            )));
        };

        if !parent_kinds.contains(&parent.kind.as_str()) {
            return Err(LifecycleError::validation(format!(
                "'{}' cannot be a child of '{}'",
                kind.name, parent.kind
            )));
        }
        if self.repo.get_previous_version(parent).await?.is_none() {
            return Err(LifecycleError::validation(format!(
                "parent {parent} does not exist"
            )));
        }
        Ok(())
    }

    fn validate_upload(
        &self,
        kind: &OwnerKindSpec,
        slot: &SlotSpec,
        upload: Upload,
    ) -> Result<PreparedUpload, LifecycleError> {
        let original_name = validate_filename(&upload.filename)
            .map_err(|e| LifecycleError::validation(format!("slot '{}': {}", slot.name, e.message())))?
            .to_string();

        if upload.data.is_empty() {
            return Err(LifecycleError::validation(format!(
                "slot '{}': payload is empty",
                slot.name
            )));
        }
        let size = upload.data.len() as u64;
        if size > self.max_asset_size {
            return Err(LifecycleError::validation(format!(
                "slot '{}': payload is {size} bytes, limit is {}",
                slot.name, self.max_asset_size
            )));
        }

        let extension = normalized_extension(&original_name);
        if !slot.allows_extension(extension.as_deref()) {
            return Err(LifecycleError::validation(format!(
                "slot '{}': file type '{}' is not allowed",
                slot.name,
                extension.as_deref().unwrap_or("")
            )));
        }

        let guessed = mime_guess::from_path(&original_name).first();
        if slot.content_kind == ContentKind::Image
            && !guessed
                .as_ref()
                .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE)
        {
            return Err(LifecycleError::validation(format!(
                "slot '{}': '{original_name}' is not an image",
                slot.name
            )));
        }

        Ok(PreparedUpload {
            slot: slot.name.clone(),
            content_kind: slot.content_kind,
            namespace: kind.namespace_for(slot),
            original_name,
            content_type: guessed.map(|m| m.essence_str().to_string()),
            checksum: Checksum::of(&upload.data),
            data: upload.data,
        })
    }

    /// Downscale image payloads. A payload that fails to decode is kept as received
    /// and reported as a warning.
    async fn normalize_all(
        &self,
        mut prepared: Vec<PreparedUpload>,
        warnings: &mut Vec<WriteWarning>,
    ) -> Result<Vec<PreparedUpload>, LifecycleError> {
        for upload in prepared
            .iter_mut()
            .filter(|p| p.content_kind == ContentKind::Image)
        {
            let normalizer = self.normalizer.clone();
            let data = std::mem::take(&mut upload.data);
            let (data, result) = tokio::task::spawn_blocking(move || {
                let result = normalizer.normalize(&data);
                (data, result)
            })
            .await
            .map_err(|e| LifecycleError::Internal(format!("image normalization task failed: {e}")))?;

            upload.data = match result {
                Ok(Normalized::Resized {
                    data: resized,
                    width,
                    height,
                }) => {
                    debug!(slot = %upload.slot, width, height, "Image downscaled");
                    resized
                }
                Ok(Normalized::Unchanged) => data,
                Err(e) => {
                    warn!(slot = %upload.slot, error = %e, "Storing image without normalization");
                    warnings.push(WriteWarning::Decode {
                        slot: upload.slot.clone(),
                        message: e.to_string(),
                    });
                    data
                }
            };
        }
        Ok(prepared)
    }

    /// Store each payload under a fresh key. On the first failure everything stored so
    /// far is removed again and the write fails.
    async fn store_all(
        &self,
        prepared: Vec<PreparedUpload>,
    ) -> Result<Vec<(String, AssetRef)>, LifecycleError> {
        let mut stored: Vec<(String, AssetRef)> = Vec::with_capacity(prepared.len());

        for upload in prepared {
            let key = match self.paths.assign(&upload.namespace, &upload.original_name) {
                Ok(key) => key,
                Err(e) => {
                    self.discard(stored.iter().map(|(_, a)| &a.key)).await;
                    return Err(LifecycleError::Internal(format!(
                        "cannot mint key in '{}': {e}",
                        upload.namespace
                    )));
                }
            };

            if let Err(e) = self
                .store
                .put(&key, &upload.data, upload.content_type.as_deref())
                .await
            {
                error!(slot = %upload.slot, key = %key, error = %e, "Failed to store asset");
                self.discard(stored.iter().map(|(_, a)| &a.key)).await;
                return Err(LifecycleError::Store { key, source: e });
            }
            debug!(slot = %upload.slot, key = %key, size = upload.data.len(), "Stored asset");

            stored.push((
                upload.slot,
                AssetRef {
                    key,
                    original_name: upload.original_name,
                    content_kind: upload.content_kind,
                    content_type: upload.content_type,
                    size: upload.data.len() as u64,
                    checksum: upload.checksum,
                },
            ));
        }
        Ok(stored)
    }

    /// Write the row. If that fails, the keys minted for it are unreferenced and get
    /// removed before the error is returned.
    async fn commit(
        &self,
        next: &AssetOwner,
        minted: &[AssetKey],
    ) -> Result<AssetOwner, LifecycleError> {
        match self.repo.save(next).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                error!(error = %e, "Failed to commit owner");
                self.discard(minted.iter()).await;
                Err(e.into())
            }
        }
    }

    /// Best-effort removal of objects that never made it into a committed row.
    async fn discard<'a>(&self, keys: impl Iterator<Item = &'a AssetKey>) {
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "Failed to discard uncommitted asset");
                self.backlog.record_failure(key, &e.to_string()).await;
            }
        }
    }

    /// Delete keys that committed rows no longer reference. Failures go to the backlog.
    async fn purge(&self, keys: &[AssetKey]) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        for key in keys {
            match self.store.delete(key).await {
                Ok(removed) => {
                    debug!(key = %key, removed, "Purged asset");
                    summary.purged.push(key.clone());
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to purge asset, deferring");
                    if let PurgeDecision::Exhausted { history } =
                        self.backlog.record_failure(key, &e.to_string()).await
                    {
                        error!(key = %key, attempts = history.len(), "Giving up on purge");
                    }
                    summary.deferred.push(key.clone());
                }
            }
        }
        summary
    }

    /// Depth-first walk from `root`. Returns the owners children-first and every key
    /// they reference.
    async fn collect_subtree(
        &self,
        root: AssetOwner,
    ) -> Result<(Vec<OwnerRef>, Vec<AssetKey>), LifecycleError> {
        let mut order = Vec::new();
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];

        while let Some(owner) = stack.pop() {
            let owner_ref = owner.owner_ref();
            if !seen.insert(owner_ref.clone()) {
                warn!(owner = %owner_ref, "Owner reached twice while collecting subtree");
                continue;
            }
            keys.extend(owner.keys().cloned());

            let children = self.repo.children(&owner_ref).await?;
            stack.extend(children.into_iter().rev());
            order.push(owner_ref);
        }

        order.reverse();
        Ok((order, keys))
    }
}

fn find_slot<'a>(kind: &'a OwnerKindSpec, slot: &str) -> Result<&'a SlotSpec, LifecycleError> {
    kind.find_slot(slot).ok_or_else(|| {
        LifecycleError::validation(format!("'{}' has no slot '{slot}'", kind.name))
    })
}

fn advance(from: WritePhase, to: WritePhase) -> WritePhase {
    debug!(from = %from, to = %to, "Write phase");
    to
}
