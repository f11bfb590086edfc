//! Resilient request execution across the endpoint pool
//!
//! One logical request becomes up to `max_attempts` proxied dispatches
//! through health-selected endpoints, then a single direct fallback. Every
//! attempt feeds the health tracker, and repeated method rejections trip
//! the shared circuit breaker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::{Method, StatusCode};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::circuit::CircuitBreaker;
use super::selector;
use super::transport::{ProxyRequest, ProxyResponse, Transport};
use crate::error::{DetourError, Result};
use crate::models::{PoolSummary, ProxyEndpoint};
use crate::pool::ProxyPool;

/// Synthetic latency recorded for attempts that timed out
pub const TIMEOUT_LATENCY_PENALTY_MS: u64 = 10_000;

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum proxied attempts per logical request
    pub max_attempts: u32,
    /// Fixed pause between proxied attempts
    pub retry_delay: Duration,
    /// Per-attempt timeout for proxied dispatches, kept shorter than a
    /// request's own timeout
    pub proxy_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            proxy_timeout: Duration::from_secs(15),
        }
    }
}

enum AttemptOutcome {
    Success(ProxyResponse),
    Failed(DetourError),
    CircuitTripped,
}

/// Orchestrates logical requests across the pool
///
/// Shared state lives behind `Arc`s, so any number of concurrent `execute`
/// calls interleave safely; each call keeps its own attempt counter and
/// exclusion set.
pub struct ProxyExecutor {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    circuit: Arc<CircuitBreaker>,
    config: ExecutorConfig,
}

impl ProxyExecutor {
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        Self::with_circuit(pool, transport, Arc::new(CircuitBreaker::new()), config)
    }

    /// Build an executor over an existing breaker
    ///
    /// The breaker is process-wide state: every executor in the process must
    /// share one, or a trip observed through one executor leaves the others
    /// still dispatching through the pool. Callers running several executors
    /// (one per retry policy, say) construct the first with
    /// [`ProxyExecutor::new`] and hand its [`ProxyExecutor::circuit`] to the
    /// rest.
    pub fn with_circuit(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn Transport>,
        circuit: Arc<CircuitBreaker>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            circuit,
            config,
        }
    }

    /// The shared circuit breaker
    pub fn circuit(&self) -> Arc<CircuitBreaker> {
        self.circuit.clone()
    }

    /// The shared endpoint pool
    pub fn pool(&self) -> Arc<ProxyPool> {
        self.pool.clone()
    }

    /// Whether proxied execution is currently enabled
    pub fn is_enabled(&self) -> bool {
        self.circuit.is_enabled()
    }

    /// Manually enable or disable the proxy layer
    pub fn set_enabled(&self, enabled: bool) {
        self.circuit.set_enabled(enabled);
    }

    /// Parse and add an endpoint to the pool
    pub async fn add_endpoint(&self, raw: &str) -> Result<bool> {
        self.pool.add_endpoint(raw).await
    }

    /// Remove an endpoint by key or full definition
    pub async fn remove_endpoint(&self, raw: &str) -> bool {
        self.pool.remove_endpoint(raw).await
    }

    /// Report an endpoint as blocked by the target
    pub fn mark_blocked(&self, key: &str) {
        self.pool.mark_blocked(key);
    }

    /// Clear all endpoint statistics
    pub async fn reset_stats(&self) {
        self.pool.reset_stats().await;
    }

    /// Health roll-up across the pool
    pub fn stats_summary(&self) -> PoolSummary {
        self.pool.summary()
    }

    /// Execute one logical request
    ///
    /// Returns whatever response the winning dispatch produced, including
    /// non-2xx direct fallback responses. The only error surfaced to the
    /// caller is the aggregate of a fully failed call: every proxied
    /// attempt plus the final direct fallback.
    #[instrument(
        skip(self, request),
        fields(call_id = %Uuid::new_v4(), method = %request.method, url = %request.url)
    )]
    pub async fn execute(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        if !self.circuit.is_enabled() {
            debug!("Proxy layer disabled, dispatching directly");
            return self.dispatch_direct(&request).await;
        }

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_proxy_error: Option<DetourError> = None;
        let mut attempt = 0;

        while attempt < self.config.max_attempts {
            attempt += 1;

            let Some(endpoint) = self.select_endpoint(&excluded) else {
                debug!("No endpoint available, falling back to direct dispatch");
                return self.finish_direct(&request, attempt, last_proxy_error).await;
            };
            let key = endpoint.key();

            debug!(
                endpoint = %key,
                attempt,
                max_attempts = self.config.max_attempts,
                "Dispatching through endpoint"
            );

            match self.attempt_via(&request, &endpoint).await {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::CircuitTripped => {
                    info!("Circuit tripped, returning direct dispatch result");
                    return self.dispatch_direct(&request).await;
                }
                AttemptOutcome::Failed(err) => {
                    warn!(endpoint = %key, attempt, error = %err, "Attempt failed");
                    excluded.insert(key);
                    last_proxy_error = Some(err);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        debug!(attempts = attempt, "All proxied attempts failed, dispatching directly");
        self.finish_direct(&request, attempt, last_proxy_error).await
    }

    /// One attempt against one endpoint, including the method-downgrade
    /// retry a 405 earns for POST requests
    async fn attempt_via(&self, request: &ProxyRequest, endpoint: &ProxyEndpoint) -> AttemptOutcome {
        let key = endpoint.key();
        let mut current = request.clone().with_timeout(self.config.proxy_timeout);

        loop {
            let started = Instant::now();
            let result = self.transport.dispatch(&current, Some(endpoint)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) if response.status.is_success() => {
                    self.circuit.record_success();
                    self.pool.record_outcome(&key, true, elapsed_ms, false);
                    return AttemptOutcome::Success(response);
                }
                Ok(response) if response.status == StatusCode::METHOD_NOT_ALLOWED => {
                    if self.circuit.record_method_not_allowed() {
                        self.pool.record_outcome(&key, false, elapsed_ms, false);
                        return AttemptOutcome::CircuitTripped;
                    }
                    if current.method == Method::POST {
                        // Some exits strip or reject POST; fold the body into
                        // the query and reissue against the same endpoint
                        // without consuming another attempt.
                        match current.to_query_get() {
                            Ok(downgraded) => {
                                debug!(endpoint = %key, "405 on POST, reissuing as query-encoded GET");
                                current = downgraded;
                                continue;
                            }
                            Err(err) => {
                                self.pool.record_outcome(&key, false, elapsed_ms, false);
                                return AttemptOutcome::Failed(err);
                            }
                        }
                    }
                    self.pool.record_outcome(&key, false, elapsed_ms, false);
                    return AttemptOutcome::Failed(DetourError::UpstreamStatus(response.status));
                }
                Ok(response) => {
                    self.pool.record_outcome(&key, false, elapsed_ms, false);
                    return AttemptOutcome::Failed(DetourError::UpstreamStatus(response.status));
                }
                Err(err) => {
                    let latency = if err.is_timeout() {
                        TIMEOUT_LATENCY_PENALTY_MS
                    } else {
                        elapsed_ms
                    };
                    self.pool.record_outcome(&key, false, latency, false);
                    return AttemptOutcome::Failed(err);
                }
            }
        }
    }

    fn select_endpoint(&self, excluded: &HashSet<String>) -> Option<ProxyEndpoint> {
        let (endpoints, stats) = self.pool.snapshot();
        selector::select_endpoint(&endpoints, &stats, excluded, Utc::now(), &mut rand::thread_rng())
            .cloned()
    }

    /// One unproxied dispatch; any HTTP response counts as the outcome
    async fn dispatch_direct(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let response = self.transport.dispatch(request, None).await?;
        if response.status.is_success() {
            self.circuit.record_success();
        }
        Ok(response)
    }

    /// The final unproxied dispatch of a failed call; a transport failure
    /// here aggregates both sides into one error
    async fn finish_direct(
        &self,
        request: &ProxyRequest,
        attempts: u32,
        last_proxy_error: Option<DetourError>,
    ) -> Result<ProxyResponse> {
        match self.dispatch_direct(request).await {
            Ok(response) => Ok(response),
            Err(direct_error) => Err(DetourError::Exhausted {
                attempts,
                proxy_error: Box::new(
                    last_proxy_error.unwrap_or(DetourError::NoEndpointsAvailable),
                ),
                direct_error: Box::new(direct_error),
            }),
        }
    }
}
