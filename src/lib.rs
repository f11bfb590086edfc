//! Detour - Resilient Proxied Request Layer
//!
//! Executes HTTP requests through a rotating pool of forward proxies, with
//! health-biased endpoint selection, retry across endpoints, and a direct
//! connection as the fallback of last resort.
//!
//! ## Features
//!
//! - Weighted endpoint selection biased by live success and latency statistics
//! - Failure and block penalties with a one-hour cooldown decay
//! - Retry-with-exclusion around every logical request, then one direct fallback
//! - Shared circuit breaker that bypasses the pool on systemic rejection
//! - Durable endpoint list and statistics with debounced writes
//! - Active probing to warm endpoint statistics

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod proxy;
pub mod storage;

pub use config::Config;
pub use error::{DetourError, Result};
pub use models::{EndpointReport, EndpointState, EndpointStats, PoolSummary, ProxyEndpoint};
pub use pool::{PoolConfig, ProxyPool};
pub use proxy::{
    CircuitBreaker, ExecutorConfig, HttpTransport, PoolProbe, ProbeConfig, ProxyExecutor,
    ProxyRequest, ProxyResponse, Transport,
};
pub use storage::{FileStore, KvStore, MemoryStore};
