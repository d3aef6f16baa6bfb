//! Reconciliation of the store against committed rows.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::storage::{AssetKey, AssetStore};
use futures::TryStreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::backlog::{PurgeBacklog, PurgeDecision};
use crate::catalog::OwnerCatalog;
use crate::error::LifecycleError;
use crate::model::{AssetRef, OwnerRef, SlotRef};
use crate::repository::RecordRepository;

/// Default age an unreferenced object must reach before it is deleted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15 * 60);

/// A committed row references a key whose object is missing from the store.
///
/// Never repaired automatically; there is no payload to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityAlert {
    pub owner: OwnerRef,
    pub slot: String,
    pub asset: AssetRef,
}

impl fmt::Display for IntegrityAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slot '{}' references missing object '{}'",
            self.owner, self.slot, self.asset.key
        )
    }
}

/// What one sweep found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Objects in the store.
    pub scanned_objects: usize,
    /// References across all rows.
    pub scanned_refs: usize,
    /// Unreferenced objects past the grace period that were deleted.
    pub orphaned_keys: Vec<AssetKey>,
    /// Unreferenced objects still inside the grace period, left alone.
    pub retained_recent: Vec<AssetKey>,
    /// Orphan deletes that failed and were added to the backlog.
    pub failed_purges: Vec<AssetKey>,
    /// Backlogged keys deleted on this pass.
    pub backlog_purged: Vec<AssetKey>,
    /// Backlogged keys dropped after running out of retries.
    pub backlog_exhausted: Vec<AssetKey>,
    pub dangling_refs: Vec<IntegrityAlert>,
}

impl SweepReport {
    /// Nothing to delete and nothing missing.
    pub fn is_clean(&self) -> bool {
        self.orphaned_keys.is_empty()
            && self.failed_purges.is_empty()
            && self.dangling_refs.is_empty()
            && self.backlog_purged.is_empty()
            && self.backlog_exhausted.is_empty()
    }
}

/// Finds store objects no row references, and row references with no object.
pub struct OrphanSweeper {
    catalog: Arc<OwnerCatalog>,
    store: Arc<dyn AssetStore>,
    repo: Arc<dyn RecordRepository>,
    backlog: PurgeBacklog,
    grace_period: Duration,
}

impl OrphanSweeper {
    pub fn new(
        catalog: Arc<OwnerCatalog>,
        store: Arc<dyn AssetStore>,
        repo: Arc<dyn RecordRepository>,
        backlog: PurgeBacklog,
    ) -> Self {
        Self {
            catalog,
            store,
            repo,
            backlog,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Objects younger than `grace_period` are never treated as orphans, so an upload
    /// whose row has not committed yet is not deleted under it.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn backlog(&self) -> &PurgeBacklog {
        &self.backlog
    }

    /// Run one reconciliation pass.
    ///
    /// Retries the purge backlog, then lists the store before enumerating rows: an
    /// object stored after the listing cannot be mistaken for an orphan, and one
    /// stored before it is protected by the grace period until its row commits.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport, LifecycleError> {
        let mut report = SweepReport::default();

        self.retry_backlog(&mut report).await;

        let objects = self
            .store
            .list()
            .await
            .map_err(LifecycleError::StoreUnavailable)?;
        report.scanned_objects = objects.len();

        let referenced = self.collect_refs().await?;
        report.scanned_refs = referenced.len();

        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.grace_period)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut listed = HashSet::with_capacity(objects.len());
        for object in objects {
            listed.insert(object.key.clone());
            // Backlogged keys were already tried above; exhausted ones wait for the next pass.
            if referenced.contains_key(&object.key)
                || report.backlog_exhausted.contains(&object.key)
                || self.backlog.contains(&object.key).await
            {
                continue;
            }
            if object.modified_at > cutoff {
                debug!(key = %object.key, "Unreferenced object inside grace period");
                report.retained_recent.push(object.key);
                continue;
            }

            match self.store.delete(&object.key).await {
                Ok(_) => {
                    info!(key = %object.key, size = object.size, "Deleted orphaned object");
                    report.orphaned_keys.push(object.key);
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Failed to delete orphaned object");
                    self.backlog.record_failure(&object.key, &e.to_string()).await;
                    report.failed_purges.push(object.key);
                }
            }
        }

        for (key, SlotRef { owner, slot, asset }) in referenced {
            if listed.contains(&key) {
                continue;
            }
            // The row may have committed after the listing; only a confirmed miss counts.
            match self.store.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    let alert = IntegrityAlert { owner, slot, asset };
                    error!(
                        owner = %alert.owner,
                        slot = %alert.slot,
                        key = %key,
                        "Row references a missing object"
                    );
                    report.dangling_refs.push(alert);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not confirm referenced object");
                }
            }
        }

        report.orphaned_keys.sort();
        report.retained_recent.sort();
        report.failed_purges.sort();
        report
            .dangling_refs
            .sort_by(|a, b| a.asset.key.cmp(&b.asset.key));

        info!(
            objects = report.scanned_objects,
            refs = report.scanned_refs,
            orphans = report.orphaned_keys.len(),
            retained = report.retained_recent.len(),
            dangling = report.dangling_refs.len(),
            backlog_purged = report.backlog_purged.len(),
            "Sweep complete"
        );

        Ok(report)
    }

    async fn retry_backlog(&self, report: &mut SweepReport) {
        for key in self.backlog.pending().await {
            match self.store.delete(&key).await {
                Ok(_) => {
                    self.backlog.clear(&key).await;
                    debug!(key = %key, "Deferred purge completed");
                    report.backlog_purged.push(key);
                }
                Err(e) => match self.backlog.record_failure(&key, &e.to_string()).await {
                    PurgeDecision::Retry { attempt, .. } => {
                        warn!(key = %key, attempt, error = %e, "Deferred purge failed again");
                    }
                    PurgeDecision::Exhausted { history } => {
                        error!(
                            key = %key,
                            attempts = history.len(),
                            error = %e,
                            "Deferred purge retries exhausted"
                        );
                        report.backlog_exhausted.push(key);
                    }
                },
            }
        }
    }

    /// Every referenced key, with the row and slot holding it.
    ///
    /// Reads every row regardless of the catalog: a kind dropped from configuration
    /// still holds live references.
    async fn collect_refs(&self) -> Result<HashMap<AssetKey, SlotRef>, LifecycleError> {
        let mut referenced = HashMap::new();
        let mut unconfigured = BTreeSet::new();

        let mut refs = self.repo.enumerate_refs();
        while let Some(slot_ref) = refs.try_next().await? {
            if self.catalog.get(&slot_ref.owner.kind).is_none() {
                unconfigured.insert(slot_ref.owner.kind.clone());
            }
            referenced.insert(slot_ref.asset.key.clone(), slot_ref);
        }

        if !unconfigured.is_empty() {
            warn!(
                kinds = ?unconfigured,
                "Rows of unconfigured kinds still reference assets; keeping them"
            );
        }
        Ok(referenced)
    }
}
