use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::config::SweeperConfig;
use lifecycle::OrphanSweeper;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Run the orphan sweeper as a background task.
pub async fn run_orphan_sweeper(sweeper: Arc<OrphanSweeper>, config: SweeperConfig) {
    let scan_interval = Duration::from_secs(config.interval_secs.max(1));

    info!(
        interval_secs = config.interval_secs,
        grace_period_secs = config.grace_period_secs,
        max_purge_retries = config.max_purge_retries,
        "Starting orphan sweeper"
    );

    let mut interval = tokio::time::interval(scan_interval);
    // A slow sweep should not be followed by a burst of catch-up sweeps.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(e) = sweep(&sweeper).await {
            error!(error = %e, "Orphan sweep failed");
        }
    }
}

async fn sweep(sweeper: &OrphanSweeper) -> anyhow::Result<()> {
    let report = sweeper
        .sweep_once()
        .await
        .context("Failed to reconcile store with database")?;

    if !report.dangling_refs.is_empty() {
        warn!(
            count = report.dangling_refs.len(),
            "Rows reference missing objects; manual repair required"
        );
    }
    let pending = sweeper.backlog().len().await;
    if pending > 0 {
        warn!(pending, "Deferred purges still outstanding");
    }

    Ok(())
}
