use std::fmt;

/// Errors raised by an [`AssetStore`](super::AssetStore) backend.
#[derive(Debug)]
pub enum StorageError {
    /// No object is stored under the key.
    NotFound(String),
    /// A local filesystem operation failed.
    Io(std::io::Error),
    /// The key is not safe to use as a path or object name.
    InvalidKey(String),
    /// The payload is larger than the store accepts.
    SizeLimitExceeded { actual: u64, limit: u64 },
    /// The remote backend rejected the request or could not be reached.
    Backend(String),
}

impl StorageError {
    /// Whether the error only reports a missing object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "asset not found: {key}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::InvalidKey(msg) => write!(f, "invalid asset key: {msg}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "asset exceeds size limit ({actual} > {limit} bytes)")
            }
            Self::Backend(msg) => write!(f, "storage backend error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
