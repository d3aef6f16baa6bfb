mod checksum;
mod error;
mod key;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod s3;

pub use checksum::Checksum;
pub use error::StorageError;
pub use key::{AssetKey, MAX_KEY_LEN};
pub use traits::{AssetStore, StoredObject};
