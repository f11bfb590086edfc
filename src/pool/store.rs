//! Endpoint pool with durable state and per-endpoint health tracking

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::flush::StatsFlusher;
use crate::error::Result;
use crate::models::{EndpointReport, EndpointState, EndpointStats, PoolSummary, ProxyEndpoint};
use crate::storage::KvStore;

/// Storage key for the serialized endpoint list
pub(crate) const ENDPOINTS_KEY: &str = "proxy.endpoints";
/// Storage key for the per-endpoint statistics map
pub(crate) const STATS_KEY: &str = "proxy.stats";

/// Synthetic latency recorded when a block is reported without a measured
/// round trip
pub const BLOCKED_LATENCY_PENALTY_MS: u64 = 5_000;

/// Extra failure passes a block event applies on top of the first
const BLOCK_EXTRA_FAILURES: u32 = 3;

/// Endpoints seeded on first run, before an operator loads real exits.
/// RFC 5737 TEST-NET addresses: they parse and exercise the full pipeline
/// without ever reaching a live host.
const DEFAULT_ENDPOINTS: &[&str] = &[
    "198.51.100.17:3128",
    "198.51.100.42:8080",
    "203.0.113.9:3128",
    "203.0.113.70:8000",
];

/// Pool tuning
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Debounce window for coalesced statistics writes
    pub flush_debounce: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            flush_debounce: Duration::from_secs(1),
        }
    }
}

/// Durable endpoint pool shared across every in-flight call
///
/// The endpoint list and the statistics map persist through a [`KvStore`].
/// Endpoint mutations write through immediately; statistics writes are
/// debounced since they change on every attempt.
pub struct ProxyPool {
    store: Arc<dyn KvStore>,
    endpoints: RwLock<Vec<ProxyEndpoint>>,
    stats: Arc<DashMap<String, EndpointStats>>,
    flusher: StatsFlusher,
}

impl ProxyPool {
    /// Load the pool from storage, seeding the built-in defaults when the
    /// stored list is absent or empty
    pub async fn load(store: Arc<dyn KvStore>, config: PoolConfig) -> Arc<Self> {
        let mut endpoints = match store.get(ENDPOINTS_KEY).await {
            Ok(Some(raw)) => parse_endpoint_list(&raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read endpoint list, starting from defaults");
                Vec::new()
            }
        };

        let mut seeded = false;
        if endpoints.is_empty() {
            endpoints = DEFAULT_ENDPOINTS
                .iter()
                .filter_map(|raw| ProxyEndpoint::parse(raw).ok())
                .collect();
            seeded = true;
        }

        let stats: DashMap<String, EndpointStats> = match store.get(STATS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<HashMap<String, EndpointStats>>(&raw) {
                Ok(map) => map.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "Stored statistics are corrupt, starting clean");
                    DashMap::new()
                }
            },
            Ok(None) => DashMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read statistics, starting clean");
                DashMap::new()
            }
        };

        debug!(
            endpoints = endpoints.len(),
            tracked = stats.len(),
            "Loaded endpoint pool"
        );

        let stats = Arc::new(stats);
        let pool = Arc::new(Self {
            flusher: StatsFlusher::new(store.clone(), stats.clone(), config.flush_debounce),
            store,
            endpoints: RwLock::new(endpoints),
            stats,
        });

        if seeded {
            info!(count = pool.len(), "Seeded endpoint pool with built-in defaults");
            pool.save().await;
        }

        pool
    }

    /// Persist the endpoint list
    ///
    /// Storage failures are logged and swallowed; the in-memory pool stays
    /// authoritative either way.
    async fn save(&self) {
        let serialized: Vec<String> = self
            .endpoints
            .read()
            .iter()
            .map(|endpoint| endpoint.serialize())
            .collect();

        let raw = serde_json::to_string(&serialized).unwrap_or_else(|_| "[]".to_string());
        if let Err(e) = self.store.set(ENDPOINTS_KEY, &raw).await {
            warn!(error = %e, "Failed to persist endpoint list");
        }
    }

    /// Parse and append a new endpoint
    ///
    /// Returns `Ok(false)` without touching the pool when an endpoint with
    /// the same key is already present.
    pub async fn add_endpoint(&self, raw: &str) -> Result<bool> {
        let endpoint = ProxyEndpoint::parse(raw)?;
        let key = endpoint.key();

        {
            let mut endpoints = self.endpoints.write();
            if endpoints.iter().any(|existing| existing.key() == key) {
                debug!(endpoint = %key, "Endpoint already in pool");
                return Ok(false);
            }
            endpoints.push(endpoint);
        }

        info!(endpoint = %key, "Added endpoint to pool");
        self.save().await;
        Ok(true)
    }

    /// Remove an endpoint and its statistics entry
    ///
    /// Accepts either a full serialized endpoint or a bare `host:port` key.
    /// Returns whether a removal happened.
    pub async fn remove_endpoint(&self, raw: &str) -> bool {
        let key = ProxyEndpoint::parse(raw)
            .map(|endpoint| endpoint.key())
            .unwrap_or_else(|_| raw.to_string());

        let removed = {
            let mut endpoints = self.endpoints.write();
            let before = endpoints.len();
            endpoints.retain(|endpoint| endpoint.key() != key);
            endpoints.len() != before
        };

        if removed {
            info!(endpoint = %key, "Removed endpoint from pool");
            self.stats.remove(&key);
            self.save().await;
            self.flusher.mark_dirty();
        }
        removed
    }

    /// Record the outcome of one attempt against an endpoint
    ///
    /// Creates a zero-valued statistics entry on first reference. A blocked
    /// outcome runs the failure path four times in total, so one block
    /// collapses the endpoint's selection weight immediately.
    pub fn record_outcome(&self, key: &str, success: bool, latency_ms: u64, blocked: bool) {
        self.apply_outcome(key, success, latency_ms, blocked);
        self.flusher.mark_dirty();
    }

    fn apply_outcome(&self, key: &str, success: bool, latency_ms: u64, blocked: bool) {
        let now = Utc::now();
        {
            let mut entry = self.stats.entry(key.to_string()).or_default();
            if success {
                entry.apply_success(latency_ms, now);
            } else {
                entry.apply_failure(now);
                if blocked {
                    entry.blocked_count += 1;
                    entry.last_blocked_at = Some(now);
                }
            }
        }

        // The entry guard is released above; re-entering the map for the
        // extra passes must not hold a reference into the same shard.
        if !success && blocked {
            for _ in 0..BLOCK_EXTRA_FAILURES {
                self.apply_outcome(key, false, latency_ms, false);
            }
        }
    }

    /// Explicit negative signal from a caller that attributed an upstream
    /// anti-automation block to this endpoint
    pub fn mark_blocked(&self, key: &str) {
        info!(endpoint = %key, "Endpoint reported as blocked");
        self.record_outcome(key, false, BLOCKED_LATENCY_PENALTY_MS, true);
    }

    /// Clear all statistics without touching the endpoint list
    pub async fn reset_stats(&self) {
        self.stats.clear();
        if let Err(e) = self.store.remove(STATS_KEY).await {
            warn!(error = %e, "Failed to clear persisted statistics");
        }
        info!("Endpoint statistics reset");
    }

    /// Consistent view for selection: endpoint list plus statistics map
    pub fn snapshot(&self) -> (Vec<ProxyEndpoint>, HashMap<String, EndpointStats>) {
        let endpoints = self.endpoints.read().clone();
        let stats = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        (endpoints, stats)
    }

    /// Current endpoint list
    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.endpoints.read().clone()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Statistics entry for one endpoint key
    pub fn stats_for(&self, key: &str) -> Option<EndpointStats> {
        self.stats.get(key).map(|entry| entry.value().clone())
    }

    /// Read-only health roll-up across the pool
    pub fn summary(&self) -> PoolSummary {
        let now = Utc::now();
        let (endpoints, stats) = self.snapshot();

        let mut summary = PoolSummary {
            total_endpoints: endpoints.len(),
            working: 0,
            failed: 0,
            blocked: 0,
            endpoints: Vec::with_capacity(endpoints.len()),
        };

        for endpoint in &endpoints {
            let key = endpoint.key();
            let entry = stats.get(&key);
            let state = EndpointState::classify(entry, now);
            match state {
                EndpointState::Working => summary.working += 1,
                EndpointState::Failed => summary.failed += 1,
                EndpointState::Blocked => summary.blocked += 1,
                EndpointState::Untested => {}
            }
            summary.endpoints.push(EndpointReport::new(key, entry, state));
        }

        summary
    }

    /// Force any pending statistics write to complete now
    pub async fn flush_stats(&self) {
        self.flusher.flush_now().await;
    }
}

fn parse_endpoint_list(raw: &str) -> Vec<ProxyEndpoint> {
    let entries: Vec<String> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Stored endpoint list is corrupt");
            return Vec::new();
        }
    };

    let mut endpoints = Vec::with_capacity(entries.len());
    for entry in &entries {
        match ProxyEndpoint::parse(entry) {
            Ok(endpoint) => endpoints.push(endpoint),
            // One bad entry never aborts the load.
            Err(e) => warn!(entry = %entry, error = %e, "Dropping unparseable endpoint"),
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::selector;
    use crate::storage::MemoryStore;

    async fn pool_with(entries: &[&str]) -> (Arc<ProxyPool>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let raw = serde_json::to_string(entries).unwrap();
        store.set(ENDPOINTS_KEY, &raw).await.unwrap();
        let pool = ProxyPool::load(store.clone(), PoolConfig::default()).await;
        (pool, store)
    }

    #[tokio::test]
    async fn test_load_seeds_defaults_when_empty() {
        let store = Arc::new(MemoryStore::new());
        let pool = ProxyPool::load(store.clone(), PoolConfig::default()).await;

        assert_eq!(pool.len(), DEFAULT_ENDPOINTS.len());

        // The seeded list is written back so the next run sees it.
        let raw = store.get(ENDPOINTS_KEY).await.unwrap().unwrap();
        let persisted: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.len(), DEFAULT_ENDPOINTS.len());
    }

    #[tokio::test]
    async fn test_load_drops_malformed_entries() {
        let (pool, _) = pool_with(&[
            "10.0.0.1:3128",
            "not-an-endpoint",
            "10.0.0.2:99999",
            "10.0.0.3:8080:user:pass",
        ])
        .await;

        let keys: Vec<String> = pool.endpoints().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["10.0.0.1:3128", "10.0.0.3:8080"]);
    }

    #[tokio::test]
    async fn test_load_with_corrupt_list_seeds_defaults() {
        let store = Arc::new(MemoryStore::new());
        store.set(ENDPOINTS_KEY, "{ not json").await.unwrap();

        let pool = ProxyPool::load(store, PoolConfig::default()).await;
        assert_eq!(pool.len(), DEFAULT_ENDPOINTS.len());
    }

    #[tokio::test]
    async fn test_load_restores_stats() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(ENDPOINTS_KEY, r#"["10.0.0.1:3128"]"#)
            .await
            .unwrap();

        let mut entry = EndpointStats::default();
        entry.apply_success(100, Utc::now());
        let map: HashMap<String, EndpointStats> =
            [("10.0.0.1:3128".to_string(), entry)].into();
        store
            .set(STATS_KEY, &serde_json::to_string(&map).unwrap())
            .await
            .unwrap();

        let pool = ProxyPool::load(store, PoolConfig::default()).await;
        let restored = pool.stats_for("10.0.0.1:3128").unwrap();
        assert_eq!(restored.successful_requests, 1);
        assert_eq!(restored.avg_response_time_ms, 100);
    }

    #[tokio::test]
    async fn test_add_endpoint() {
        let (pool, store) = pool_with(&["10.0.0.1:3128"]).await;

        assert!(pool.add_endpoint("10.0.0.2:8080:user:pass").await.unwrap());
        assert_eq!(pool.len(), 2);

        let raw = store.get(ENDPOINTS_KEY).await.unwrap().unwrap();
        let persisted: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert!(persisted.contains(&"10.0.0.2:8080:user:pass".to_string()));
    }

    #[tokio::test]
    async fn test_add_duplicate_key_is_rejected() {
        let (pool, _) = pool_with(&["10.0.0.1:3128"]).await;

        // Same key, different credentials: still a duplicate.
        assert!(!pool.add_endpoint("10.0.0.1:3128:user:pass").await.unwrap());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_add_invalid_endpoint_fails() {
        let (pool, _) = pool_with(&["10.0.0.1:3128"]).await;
        assert!(pool.add_endpoint("nonsense").await.is_err());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_endpoint_by_key_or_full_form() {
        let (pool, _) = pool_with(&["10.0.0.1:3128:user:pass", "10.0.0.2:8080"]).await;
        pool.record_outcome("10.0.0.1:3128", true, 100, false);

        // Bare key removes the credentialed endpoint and its stats.
        assert!(pool.remove_endpoint("10.0.0.1:3128").await);
        assert_eq!(pool.len(), 1);
        assert!(pool.stats_for("10.0.0.1:3128").is_none());

        // Full serialized form works too.
        assert!(pool.remove_endpoint("10.0.0.2:8080").await);
        assert!(pool.is_empty());

        assert!(!pool.remove_endpoint("10.0.0.9:9999").await);
    }

    #[tokio::test]
    async fn test_record_outcome_creates_entry() {
        let (pool, _) = pool_with(&["10.0.0.1:3128"]).await;

        pool.record_outcome("10.0.0.1:3128", true, 250, false);
        pool.record_outcome("10.0.0.1:3128", true, 150, false);

        let stats = pool.stats_for("10.0.0.1:3128").unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.avg_response_time_ms, 200);
        assert!(stats.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_blocked_outcome_runs_failure_path_four_times() {
        let (pool, _) = pool_with(&["10.0.0.1:3128"]).await;
        for _ in 0..10 {
            pool.record_outcome("10.0.0.1:3128", true, 100, false);
        }

        pool.mark_blocked("10.0.0.1:3128");

        let stats = pool.stats_for("10.0.0.1:3128").unwrap();
        assert_eq!(stats.total_requests, 14);
        assert_eq!(stats.successful_requests, 10);
        assert_eq!(stats.consecutive_failures, 4);
        assert_eq!(stats.blocked_count, 1);
        assert!(stats.last_blocked_at.is_some());
    }

    #[tokio::test]
    async fn test_block_collapses_selection_weight() {
        let (pool, _) = pool_with(&["10.0.0.1:3128"]).await;
        for _ in 0..10 {
            pool.record_outcome("10.0.0.1:3128", true, 100, false);
        }

        let now = Utc::now();
        let before = selector::endpoint_weight(pool.stats_for("10.0.0.1:3128").as_ref(), now);

        pool.mark_blocked("10.0.0.1:3128");
        let after = selector::endpoint_weight(pool.stats_for("10.0.0.1:3128").as_ref(), now);

        assert!(before / after >= 10.0, "before={before} after={after}");
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let (pool, store) = pool_with(&["10.0.0.1:3128"]).await;
        pool.record_outcome("10.0.0.1:3128", false, 100, false);
        pool.flush_stats().await;
        assert!(store.get(STATS_KEY).await.unwrap().is_some());

        pool.reset_stats().await;

        assert!(pool.stats_for("10.0.0.1:3128").is_none());
        assert!(store.get(STATS_KEY).await.unwrap().is_none());
        // The endpoint list is untouched.
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_classifies_endpoints() {
        let (pool, _) = pool_with(&[
            "10.0.0.1:3128",
            "10.0.0.2:3128",
            "10.0.0.3:3128",
            "10.0.0.4:3128",
        ])
        .await;

        pool.record_outcome("10.0.0.1:3128", true, 100, false);
        pool.record_outcome("10.0.0.2:3128", false, 100, false);
        pool.mark_blocked("10.0.0.3:3128");
        // 10.0.0.4 stays untested.

        let summary = pool.summary();
        assert_eq!(summary.total_endpoints, 4);
        assert_eq!(summary.working, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.endpoints.len(), 4);

        let states: HashMap<String, EndpointState> = summary
            .endpoints
            .iter()
            .map(|report| (report.key.clone(), report.state))
            .collect();
        assert_eq!(states["10.0.0.4:3128"], EndpointState::Untested);
    }

    #[tokio::test]
    async fn test_stats_survive_flush_and_reload() {
        let (pool, store) = pool_with(&["10.0.0.1:3128"]).await;
        pool.record_outcome("10.0.0.1:3128", true, 300, false);
        pool.flush_stats().await;

        let reloaded = ProxyPool::load(store, PoolConfig::default()).await;
        let stats = reloaded.stats_for("10.0.0.1:3128").unwrap();
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.avg_response_time_ms, 300);
    }
}
