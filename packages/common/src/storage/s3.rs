use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use crate::config::S3StoreConfig;

use super::error::StorageError;
use super::key::AssetKey;
use super::traits::{AssetStore, StoredObject};

/// Asset store over an S3-compatible bucket (AWS S3, MinIO, R2).
///
/// Object names are `{prefix}{key}`; objects outside the prefix are ignored by `list`.
pub struct S3AssetStore {
    bucket: Box<Bucket>,
    prefix: String,
    public_url: String,
    max_size: u64,
}

impl S3AssetStore {
    pub fn new(config: &S3StoreConfig, public_url: &str, max_size: u64) -> Result<Self, StorageError> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| StorageError::Backend(format!("invalid region: {e}")))?,
        };

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials).map_err(backend)?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        let public_url = if public_url.is_empty() {
            format!("{}/{}", bucket.url().trim_end_matches('/'), config.prefix)
        } else {
            public_url.to_string()
        };

        Ok(Self {
            bucket,
            prefix: config.prefix.clone(),
            public_url: public_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    fn object_name(&self, key: &AssetKey) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn backend(err: S3Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn is_missing(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn put(
        &self,
        key: &AssetKey,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let response = self
            .bucket
            .put_object_with_content_type(
                self.object_name(key),
                data,
                content_type.unwrap_or("application/octet-stream"),
            )
            .await
            .map_err(backend)?;

        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Backend(format!(
                "put {key} returned HTTP {code}"
            ))),
        }
    }

    async fn get(&self, key: &AssetKey) -> Result<Vec<u8>, StorageError> {
        match self.bucket.get_object(self.object_name(key)).await {
            Ok(response) if response.status_code() == 404 => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Ok(response) => Ok(response.bytes().to_vec()),
            Err(e) if is_missing(&e) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete(&self, key: &AssetKey) -> Result<bool, StorageError> {
        // S3 answers 204 whether or not the object existed.
        let existed = self.exists(key).await?;
        match self.bucket.delete_object(self.object_name(key)).await {
            Ok(_) => Ok(existed),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn exists(&self, key: &AssetKey) -> Result<bool, StorageError> {
        match self.bucket.head_object(self.object_name(key)).await {
            Ok((_, 404)) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn list(&self) -> Result<Vec<StoredObject>, StorageError> {
        let pages = self
            .bucket
            .list(self.prefix.clone(), None)
            .await
            .map_err(backend)?;

        let mut objects = Vec::new();
        for object in pages.into_iter().flat_map(|page| page.contents) {
            let Some(relative) = object.key.strip_prefix(&self.prefix) else {
                continue;
            };
            let Ok(key) = AssetKey::parse(relative) else {
                tracing::debug!(object = %object.key, "Skipping foreign object in bucket");
                continue;
            };
            let modified_at = DateTime::parse_from_rfc3339(&object.last_modified)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            objects.push(StoredObject {
                key,
                size: object.size,
                modified_at,
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn resolve_url(&self, key: &AssetKey) -> String {
        format!("{}/{}", self.public_url, key)
    }
}
