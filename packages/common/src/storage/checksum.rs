use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::StorageError;

/// SHA-256 digest of an uploaded payload, as received.
///
/// Stored next to every asset reference so a re-upload of identical bytes can be
/// recognised without reading the stored object back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse the 64-character lowercase or uppercase hex form.
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        let bytes = hex::decode(s)
            .map_err(|e| StorageError::Backend(format!("malformed checksum '{s}': {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            StorageError::Backend(format!("checksum has {} bytes, expected 32", b.len()))
        })?;
        Ok(Self(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
