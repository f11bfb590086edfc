//! Debounced persistence for the statistics map
//!
//! Statistics mutate on every attempt, so each write would be one disk hit
//! per request. Writes coalesce instead: the first mark after a quiet
//! period schedules a single deferred write, and every further mark inside
//! the window rides along with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::store::STATS_KEY;
use crate::models::EndpointStats;
use crate::storage::KvStore;

pub(crate) struct StatsFlusher {
    store: Arc<dyn KvStore>,
    stats: Arc<DashMap<String, EndpointStats>>,
    debounce: Duration,
    scheduled: Arc<AtomicBool>,
}

impl StatsFlusher {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        stats: Arc<DashMap<String, EndpointStats>>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            stats,
            debounce,
            scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Note a mutation; schedules at most one deferred write per window
    pub(crate) fn mark_dirty(&self) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let store = self.store.clone();
        let stats = self.stats.clone();
        let scheduled = self.scheduled.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Clear before snapshotting: a mutation landing mid-write gets
            // its own follow-up window instead of being lost.
            scheduled.store(false, Ordering::Release);
            persist(&*store, &stats).await;
        });
    }

    /// Write the current statistics immediately, ahead of any pending window
    pub(crate) async fn flush_now(&self) {
        self.scheduled.store(false, Ordering::Release);
        persist(&*self.store, &self.stats).await;
    }
}

async fn persist(store: &dyn KvStore, stats: &DashMap<String, EndpointStats>) {
    let snapshot: HashMap<String, EndpointStats> = stats
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    let raw = match serde_json::to_string(&snapshot) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to serialize endpoint statistics");
            return;
        }
    };

    if let Err(e) = store.set(STATS_KEY, &raw).await {
        warn!(error = %e, "Failed to persist endpoint statistics");
    } else {
        debug!(entries = snapshot.len(), "Persisted endpoint statistics");
    }
}
