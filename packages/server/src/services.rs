use std::sync::Arc;
use std::time::Duration;

use common::storage::AssetStore;
use lifecycle::{
    AssetLifecycleManager, ImageNormalizer, LifecycleError, OrphanSweeper, PurgeBacklog,
    RecordRepository,
};

use crate::config::AppConfig;

/// The manager and sweeper for one deployment, sharing a purge backlog.
pub struct AssetServices {
    pub manager: Arc<AssetLifecycleManager>,
    pub sweeper: Arc<OrphanSweeper>,
    pub backlog: PurgeBacklog,
}

impl AssetServices {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn AssetStore>,
        repo: Arc<dyn RecordRepository>,
    ) -> Result<Self, LifecycleError> {
        let catalog = Arc::new(config.catalog()?);
        let backlog = PurgeBacklog::new(config.sweeper.max_purge_retries);

        let manager = AssetLifecycleManager::new(catalog.clone(), store.clone(), repo.clone())
            .with_normalizer(ImageNormalizer::from_config(&config.image))
            .with_max_asset_size(config.storage.max_asset_size)
            .with_backlog(backlog.clone());

        let sweeper = OrphanSweeper::new(catalog, store, repo, backlog.clone())
            .with_grace_period(Duration::from_secs(config.sweeper.grace_period_secs));

        Ok(Self {
            manager: Arc::new(manager),
            sweeper: Arc::new(sweeper),
            backlog,
        })
    }
}
