//! Active pool probing
//!
//! Warms statistics before the pool is trusted with real traffic. Probes
//! dispatch straight through the transport, never through the executor, so
//! a broken pool cannot trigger retry and fallback churn while being
//! measured.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use http::{Method, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::transport::{ProxyRequest, Transport};
use crate::models::ProxyEndpoint;
use crate::pool::ProxyPool;

/// Probe tuning
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo URL each endpoint fetches
    pub url: String,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Probes in flight at once
    pub workers: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "https://api.ipify.org".to_string(),
            timeout: Duration::from_secs(10),
            workers: 4,
        }
    }
}

/// Outcome of probing one endpoint
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub key: String,
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Active prober over the shared pool
pub struct PoolProbe {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    config: ProbeConfig,
}

impl PoolProbe {
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn Transport>, config: ProbeConfig) -> Self {
        Self {
            pool,
            transport,
            config,
        }
    }

    /// Probe every endpoint in the pool
    pub async fn probe_all(&self) -> Vec<ProbeResult> {
        let endpoints = self.pool.endpoints();
        self.probe_endpoints(endpoints).await
    }

    /// Probe the first `limit` endpoints
    pub async fn probe_subset(&self, limit: usize) -> Vec<ProbeResult> {
        let mut endpoints = self.pool.endpoints();
        endpoints.truncate(limit);
        self.probe_endpoints(endpoints).await
    }

    #[instrument(skip(self, endpoints), fields(count = endpoints.len(), url = %self.config.url))]
    async fn probe_endpoints(&self, endpoints: Vec<ProxyEndpoint>) -> Vec<ProbeResult> {
        let results: Vec<ProbeResult> = futures::stream::iter(endpoints)
            .map(|endpoint| async move { self.probe_one(&endpoint).await })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let healthy = results.iter().filter(|r| r.success).count();
        info!(
            healthy,
            unhealthy = results.len() - healthy,
            "Probe round complete"
        );
        results
    }

    /// One probe; the outcome feeds the tracker exactly like a live attempt
    async fn probe_one(&self, endpoint: &ProxyEndpoint) -> ProbeResult {
        let key = endpoint.key();
        let request =
            ProxyRequest::new(Method::GET, self.config.url.clone()).with_timeout(self.config.timeout);

        let started = Instant::now();
        let outcome = self.transport.dispatch(&request, Some(endpoint)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        // Strictly 200: captive portals and proxy error pages love to
        // answer with other 2xx/3xx statuses.
        let (success, error) = match outcome {
            Ok(response) if response.status == StatusCode::OK => (true, None),
            Ok(response) => (false, Some(format!("HTTP {}", response.status))),
            Err(e) => (false, Some(e.to_string())),
        };

        if success {
            debug!(endpoint = %key, latency_ms, "Probe succeeded");
        } else {
            warn!(
                endpoint = %key,
                error = error.as_deref().unwrap_or("unknown"),
                "Probe failed"
            );
        }

        self.pool.record_outcome(&key, success, latency_ms, false);

        ProbeResult {
            key,
            success,
            latency_ms,
            error,
        }
    }
}
