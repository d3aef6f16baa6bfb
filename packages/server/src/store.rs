use std::sync::Arc;

use anyhow::Context;
use common::config::{StorageAppConfig, StoreBackend};
use common::storage::AssetStore;
use common::storage::filesystem::FilesystemAssetStore;
use tracing::info;

/// Open the store selected by `config.backend`.
pub async fn open_store(config: &StorageAppConfig) -> anyhow::Result<Arc<dyn AssetStore>> {
    match config.backend {
        StoreBackend::Filesystem => {
            let store = FilesystemAssetStore::new(
                config.root.clone(),
                config.public_url.clone(),
                config.max_asset_size,
            )
            .await
            .with_context(|| format!("Failed to open asset root {}", config.root.display()))?;
            info!(root = %config.root.display(), "Using filesystem asset store");
            Ok(Arc::new(store))
        }
        StoreBackend::S3 => open_s3(config),
    }
}

#[cfg(feature = "object-storage")]
fn open_s3(config: &StorageAppConfig) -> anyhow::Result<Arc<dyn AssetStore>> {
    use common::storage::s3::S3AssetStore;

    let s3 = config
        .s3
        .as_ref()
        .context("storage.backend is \"s3\" but [storage.s3] is missing")?;
    let store = S3AssetStore::new(s3, &config.public_url, config.max_asset_size)
        .context("Failed to configure S3 asset store")?;
    info!(bucket = %s3.bucket, "Using S3 asset store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "object-storage"))]
fn open_s3(_config: &StorageAppConfig) -> anyhow::Result<Arc<dyn AssetStore>> {
    anyhow::bail!("storage.backend is \"s3\" but the server was built without `object-storage`")
}
