use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::error::StorageError;
use super::key::AssetKey;
use super::traits::{AssetStore, StoredObject};

const TEMP_DIR: &str = ".tmp";

/// Filesystem-backed asset store.
///
/// An object with key `news/covers/ab12.jpg` lives at `{root}/news/covers/ab12.jpg`.
/// Writes land in `{root}/.tmp` first and are renamed into place, so a crash mid-write
/// never leaves a truncated object under a real key.
pub struct FilesystemAssetStore {
    root: PathBuf,
    public_url: String,
    max_size: u64,
}

impl FilesystemAssetStore {
    /// Create the store, making `root` and its temp directory if needed.
    pub async fn new(
        root: PathBuf,
        public_url: impl Into<String>,
        max_size: u64,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        Ok(Self {
            root,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &AssetKey) -> PathBuf {
        key.to_path(&self.root)
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(TEMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl AssetStore for FilesystemAssetStore {
    async fn put(
        &self,
        key: &AssetKey,
        data: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get(&self, key: &AssetKey) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &AssetKey) -> Result<bool, StorageError> {
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &AssetKey) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn list(&self) -> Result<Vec<StoredObject>, StorageError> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Removed while walking.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };

                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == TEMP_DIR {
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Some(relative) = path
                    .strip_prefix(&self.root)
                    .ok()
                    .and_then(|p| p.to_str())
                else {
                    continue;
                };
                let relative = relative.replace(std::path::MAIN_SEPARATOR, "/");
                // Files that could never have been written through `put` are not ours.
                let Ok(key) = AssetKey::parse(&relative) else {
                    tracing::debug!(path = %path.display(), "Skipping foreign file in asset root");
                    continue;
                };

                // Purged between read_dir and stat.
                let Some(meta) = stat_object(&path).await? else {
                    continue;
                };
                let modified_at = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                objects.push(StoredObject {
                    key,
                    size: meta.len(),
                    modified_at,
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn resolve_url(&self, key: &AssetKey) -> String {
        format!("{}/{}", self.public_url, key)
    }
}

/// Metadata of a listed file, or `None` if it has since been removed.
async fn stat_object(path: &Path) -> Result<Option<std::fs::Metadata>, StorageError> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
