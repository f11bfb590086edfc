//! Shared circuit breaker for systemic proxy-layer failure
//!
//! Scattered failures are an endpoint problem and stay inside the retry
//! loop. A streak of HTTP 405 responses is different: the upstream is
//! rejecting the traffic pattern itself, so once the streak crosses the
//! threshold the whole proxy layer shuts off and requests go direct until
//! an operator re-enables it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{info, warn};

/// Consecutive HTTP 405 responses, counted across all endpoints and calls,
/// that disable the proxy layer
pub const TRIP_THRESHOLD: u32 = 5;

/// Process-wide breaker shared by every in-flight call
#[derive(Debug)]
pub struct CircuitBreaker {
    enabled: AtomicBool,
    method_not_allowed_streak: AtomicU32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            method_not_allowed_streak: AtomicU32::new(0),
        }
    }

    /// Whether proxied execution is currently allowed
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Manual override
    ///
    /// Enabling clears the 405 streak so a stale streak cannot re-trip the
    /// breaker on the next response.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::Relaxed);
        if enabled {
            self.method_not_allowed_streak.store(0, Ordering::Relaxed);
        }
        if was_enabled != enabled {
            info!(enabled, "Proxy layer toggled");
        }
    }

    /// Record an HTTP 405 from a proxied attempt
    ///
    /// Returns `true` only for the call whose 405 crossed the threshold and
    /// actually flipped the breaker off; that caller owes the request one
    /// immediate direct dispatch.
    pub fn record_method_not_allowed(&self) -> bool {
        let streak = self.method_not_allowed_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= TRIP_THRESHOLD && self.enabled.swap(false, Ordering::Relaxed) {
            warn!(streak, "Disabling proxy layer after repeated 405 responses");
            return true;
        }
        false
    }

    /// Any successful response, proxied or direct, resets the streak
    pub fn record_success(&self) {
        self.method_not_allowed_streak.store(0, Ordering::Relaxed);
    }

    /// Current 405 streak, for reporting
    pub fn method_not_allowed_streak(&self) -> u32 {
        self.method_not_allowed_streak.load(Ordering::Relaxed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
