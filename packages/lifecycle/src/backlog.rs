//! Keys whose purge failed and are waiting for the next sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::storage::AssetKey;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One failed purge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl PurgeAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// What happens to a key after a failed purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeDecision {
    /// Kept in the backlog for the next sweep.
    Retry {
        attempt: u8,
        history: Vec<PurgeAttempt>,
    },
    /// Dropped from the backlog; the orphan scan is the only thing left to catch it.
    Exhausted { history: Vec<PurgeAttempt> },
}

#[derive(Debug, Default)]
struct BacklogState {
    entries: HashMap<AssetKey, Vec<PurgeAttempt>>,
}

/// Shared record of deferred purges.
///
/// The manager adds keys it could not delete after a commit; the sweeper retries
/// them before scanning. Cloning shares the same backlog.
#[derive(Debug, Clone)]
pub struct PurgeBacklog {
    state: Arc<Mutex<BacklogState>>,
    max_retries: u8,
}

impl PurgeBacklog {
    /// A backlog that gives up on a key after `max_retries` failed retries.
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(BacklogState::default())),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Record a failed purge of `key`.
    ///
    /// The first failure (the one on the write path) does not count as a retry.
    pub async fn record_failure(&self, key: &AssetKey, error: &str) -> PurgeDecision {
        let mut state = self.state.lock().await;
        let history = state.entries.entry(key.clone()).or_default();

        let attempt = history.len().saturating_add(1).min(u8::MAX as usize) as u8;
        history.push(PurgeAttempt::new(attempt, error));

        if attempt <= self.max_retries.saturating_add(1) {
            PurgeDecision::Retry {
                attempt,
                history: history.clone(),
            }
        } else {
            let history = state.entries.remove(key).unwrap_or_default();
            PurgeDecision::Exhausted { history }
        }
    }

    /// Forget `key`, typically after a successful purge.
    pub async fn clear(&self, key: &AssetKey) -> bool {
        self.state.lock().await.entries.remove(key).is_some()
    }

    pub async fn contains(&self, key: &AssetKey) -> bool {
        self.state.lock().await.entries.contains_key(key)
    }

    /// How many times purging `key` has failed so far.
    pub async fn attempts(&self, key: &AssetKey) -> u8 {
        self.state
            .lock()
            .await
            .entries
            .get(key)
            .map(|h| h.len().min(u8::MAX as usize) as u8)
            .unwrap_or(0)
    }

    /// Keys currently waiting, sorted.
    pub async fn pending(&self) -> Vec<AssetKey> {
        let mut keys: Vec<AssetKey> = self.state.lock().await.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

impl Default for PurgeBacklog {
    fn default() -> Self {
        Self::new(5)
    }
}
