//! Durable endpoint pool with health tracking
//!
//! One [`ProxyPool`] per process: it owns the endpoint list, the
//! per-endpoint statistics, and their persistence through a
//! [`crate::storage::KvStore`].

mod flush;
pub mod store;

pub use store::{PoolConfig, ProxyPool, BLOCKED_LATENCY_PENALTY_MS};
