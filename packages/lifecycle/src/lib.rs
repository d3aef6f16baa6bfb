//! Keeps stored binaries consistent with the rows that reference them.
//!
//! Writes go through [`AssetLifecycleManager`]: new payloads are stored under fresh
//! keys before the row commits, replaced or cleared keys are purged only after it
//! commits, and deleting an owner purges every key in its subtree. Anything a failed
//! purge or a crash leaves behind is reconciled by [`OrphanSweeper`].

pub mod backlog;
pub mod catalog;
pub mod error;
pub mod manager;
pub mod memory;
pub mod model;
pub mod normalize;
pub mod path;
pub mod repository;
pub mod sweeper;

pub use backlog::PurgeBacklog;
pub use catalog::{OwnerCatalog, OwnerKindSpec, SlotSpec};
pub use error::{LifecycleError, RepositoryError, WriteWarning};
pub use manager::{AssetLifecycleManager, DeleteOutcome, WriteOutcome, WritePhase};
pub use memory::MemoryRepository;
pub use model::{
    AssetOwner, AssetRef, ContentKind, OwnerId, OwnerRef, SlotChange, SlotRef, Upload,
};
pub use normalize::{ImageNormalizer, Normalized};
pub use path::PathGenerator;
pub use repository::RecordRepository;
pub use sweeper::{IntegrityAlert, OrphanSweeper, SweepReport};
