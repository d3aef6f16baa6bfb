use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Longest key accepted, in bytes. Fits S3's 1024-byte limit with room for a prefix.
pub const MAX_KEY_LEN: usize = 512;

/// An opaque storage key such as `news/covers/0b0e...c4.jpg`.
///
/// Keys are `/`-separated segments drawn from `[A-Za-z0-9._-]`. Empty and hidden
/// segments (including `.` and `..`) are rejected, so a key can be joined onto a
/// filesystem root or used as an object name without escaping either, and never lands
/// in a store's private `.tmp` area.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey(String);

impl AssetKey {
    /// Validate and wrap a key string.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        if s.is_empty() {
            return Err(StorageError::InvalidKey("key is empty".into()));
        }
        if s.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey(format!(
                "key is {} bytes, limit is {MAX_KEY_LEN}",
                s.len()
            )));
        }

        for segment in s.split('/') {
            if segment.is_empty() {
                return Err(StorageError::InvalidKey(format!("empty segment in '{s}'")));
            }
            if segment == "." || segment == ".." {
                return Err(StorageError::InvalidKey(format!(
                    "relative segment in '{s}'"
                )));
            }
            if segment.starts_with('.') {
                return Err(StorageError::InvalidKey(format!(
                    "hidden segment '{segment}' in '{s}'"
                )));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
            {
                return Err(StorageError::InvalidKey(format!(
                    "character {c:?} not allowed in '{s}'"
                )));
            }
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the last `/`, or `""` for a single-segment key.
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once('/').map(|(ns, _)| ns).unwrap_or("")
    }

    /// Resolve the key below a filesystem root.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |p, seg| p.join(seg))
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({})", self.0)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for AssetKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AssetKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
