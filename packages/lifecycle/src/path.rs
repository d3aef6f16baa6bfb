use std::sync::Mutex;

use common::storage::{AssetKey, StorageError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Longest extension carried over from an upload's filename.
const MAX_EXTENSION_LEN: usize = 16;

/// Why an uploaded filename was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameError {
    /// Filename is empty or whitespace-only.
    Empty,
    /// Filename contains `/` or `\`.
    ContainsPathSeparator,
    /// Filename is `..`.
    PathTraversal,
    /// Filename starts with a dot.
    Hidden,
    /// Filename contains NUL, CR, LF or another control character.
    ControlCharacter,
}

impl FilenameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "filename cannot be empty",
            Self::ContainsPathSeparator => "filename must not contain path separators",
            Self::PathTraversal => "filename must not be '..'",
            Self::Hidden => "filename must not start with '.'",
            Self::ControlCharacter => "filename must not contain control characters",
        }
    }
}

/// Validate an uploader-supplied filename and return it trimmed.
///
/// The name is only kept for display, but it ends up in `Content-Disposition` headers
/// and admin listings, so anything that could smuggle a path or a header break is
/// refused.
pub fn validate_filename(filename: &str) -> Result<&str, FilenameError> {
    let trimmed = filename.trim();

    if trimmed.is_empty() {
        return Err(FilenameError::Empty);
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(FilenameError::ControlCharacter);
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if trimmed == ".." {
        return Err(FilenameError::PathTraversal);
    }
    if trimmed.starts_with('.') {
        return Err(FilenameError::Hidden);
    }

    Ok(trimmed)
}

/// The extension of `filename`, lowercased and reduced to `[a-z0-9]`.
///
/// Returns `None` when there is no usable extension (`README`, `archive.`, `x.???`).
pub fn normalized_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_EXTENSION_LEN)
        .collect();
    (!ext.is_empty()).then_some(ext)
}

enum Source {
    Os,
    Seeded(Mutex<StdRng>),
}

/// Mints storage keys of the form `{namespace}/{uuid}.{ext}`.
///
/// The identifier is 128 random bits; nothing from the row (titles, slugs, user
/// input other than the extension) goes into the key, so renaming a record can never
/// collide with another object.
pub struct PathGenerator {
    source: Source,
}

impl PathGenerator {
    /// Generator backed by the OS random source.
    pub fn new() -> Self {
        Self { source: Source::Os }
    }

    /// Deterministic generator for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            source: Source::Seeded(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn next_id(&self) -> Uuid {
        match &self.source {
            Source::Os => Uuid::new_v4(),
            Source::Seeded(rng) => {
                let bits: u128 = match rng.lock() {
                    Ok(mut rng) => rng.random(),
                    Err(poisoned) => poisoned.into_inner().random(),
                };
                uuid::Builder::from_random_bytes(bits.to_be_bytes()).into_uuid()
            }
        }
    }

    /// Mint a fresh key for an upload into `namespace`.
    pub fn assign(&self, namespace: &str, original_filename: &str) -> Result<AssetKey, StorageError> {
        let id = self.next_id().simple();
        let namespace = namespace.trim_matches('/');
        let name = match normalized_extension(original_filename) {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        };

        if namespace.is_empty() {
            AssetKey::parse(&name)
        } else {
            AssetKey::parse(&format!("{namespace}/{name}"))
        }
    }
}

impl Default for PathGenerator {
    fn default() -> Self {
        Self::new()
    }
}
