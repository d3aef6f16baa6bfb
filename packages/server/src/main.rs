use std::sync::Arc;

use anyhow::Context;
use tracing::{Level, info};

use server::config::AppConfig;
use server::repository::SeaOrmRepository;
use server::services::AssetServices;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let store = server::store::open_store(&config.storage).await?;
    let db = server::database::init_db(&config.database)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(SeaOrmRepository::new(db));

    let services =
        AssetServices::new(&config, store, repo).context("Invalid owner kind configuration")?;
    info!(
        kinds = services.manager.catalog().kinds().count(),
        "Asset lifecycle ready"
    );

    if config.sweeper.enabled {
        tokio::spawn(server::sweep_task::run_orphan_sweeper(
            services.sweeper.clone(),
            config.sweeper.clone(),
        ));
    } else {
        info!("Orphan sweeper disabled");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    Ok(())
}
