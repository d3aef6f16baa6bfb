pub mod config;
pub mod storage;

pub use storage::{AssetKey, AssetStore, Checksum, StorageError, StoredObject};
