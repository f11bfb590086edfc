//! The resilient request layer
//!
//! This module provides the proxied execution pipeline:
//! - Weighted, health-biased endpoint selection
//! - Retry across endpoints with per-call exclusion
//! - Direct-connection fallback once the pool is exhausted
//! - A shared circuit breaker for systemic rejection
//! - Active probing to warm endpoint statistics

pub mod circuit;
pub mod executor;
pub mod probe;
pub mod selector;
pub mod transport;

pub use circuit::CircuitBreaker;
pub use executor::{ExecutorConfig, ProxyExecutor};
pub use probe::{PoolProbe, ProbeConfig, ProbeResult};
pub use transport::{HttpTransport, ProxyRequest, ProxyResponse, Transport};
