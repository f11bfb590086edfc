use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a block event keeps an endpoint under the heavier selection
/// penalty and reported as blocked
pub const BLOCK_COOLDOWN_SECS: i64 = 3_600;

/// Health statistics for one proxy endpoint, keyed by `host:port`
///
/// Latency accumulates on successes only, so the average reflects how fast
/// the endpoint is when it works rather than how slowly it fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    /// Attempts recorded against this endpoint, successful or not
    pub total_requests: u64,
    /// Attempts that completed with a success outcome
    pub successful_requests: u64,
    /// Sum of response times across successful attempts (ms)
    pub total_response_time_ms: u64,
    /// Average response time across successful attempts (ms)
    pub avg_response_time_ms: u64,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Times this endpoint was reported as blocked by the target
    pub blocked_count: u32,
    /// When the most recent block was reported
    pub last_blocked_at: Option<DateTime<Utc>>,
    /// When this endpoint last served an attempt
    pub last_used_at: Option<DateTime<Utc>>,
}

impl EndpointStats {
    /// Success rate in the range 0.0 to 1.0
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    /// Apply one successful attempt
    pub fn apply_success(&mut self, latency_ms: u64, now: DateTime<Utc>) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_response_time_ms += latency_ms;
        self.avg_response_time_ms = self.total_response_time_ms / self.successful_requests;
        // One success forgives one failure, not the whole streak.
        self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
        self.last_used_at = Some(now);
    }

    /// Apply one failed attempt
    pub fn apply_failure(&mut self, now: DateTime<Utc>) {
        self.total_requests += 1;
        self.consecutive_failures += 1;
        self.last_used_at = Some(now);
    }

    /// Whether the endpoint is still inside the post-block cooldown window
    pub fn in_block_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_blocked_at
            .map(|at| now.signed_duration_since(at).num_seconds() < BLOCK_COOLDOWN_SECS)
            .unwrap_or(false)
    }
}

/// Point-in-time health classification of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    /// Recent block, still inside the cooldown window
    Blocked,
    /// Active failure streak
    Failed,
    /// Has history and no active failure streak
    Working,
    /// No attempts recorded yet
    Untested,
}

impl EndpointState {
    /// Classify an endpoint from its statistics entry, if it has one
    ///
    /// Blocked outranks failed, which outranks working; an endpoint with no
    /// recorded attempts is untested.
    pub fn classify(stats: Option<&EndpointStats>, now: DateTime<Utc>) -> Self {
        let Some(stats) = stats else {
            return EndpointState::Untested;
        };
        if stats.total_requests == 0 {
            return EndpointState::Untested;
        }
        if stats.in_block_cooldown(now) {
            return EndpointState::Blocked;
        }
        if stats.consecutive_failures > 0 {
            return EndpointState::Failed;
        }
        EndpointState::Working
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Blocked => "blocked",
            EndpointState::Failed => "failed",
            EndpointState::Working => "working",
            EndpointState::Untested => "untested",
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // pad() keeps width specifiers working in table output.
        f.pad(self.as_str())
    }
}

/// One endpoint's row in a pool summary
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub key: String,
    pub state: EndpointState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub consecutive_failures: u32,
    pub blocked_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_blocked_at: Option<DateTime<Utc>>,
}

impl EndpointReport {
    pub fn new(key: String, stats: Option<&EndpointStats>, state: EndpointState) -> Self {
        let stats = stats.cloned().unwrap_or_default();
        Self {
            key,
            state,
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            success_rate: stats.success_rate(),
            avg_response_time_ms: stats.avg_response_time_ms,
            consecutive_failures: stats.consecutive_failures,
            blocked_count: stats.blocked_count,
            last_used_at: stats.last_used_at,
            last_blocked_at: stats.last_blocked_at,
        }
    }
}

/// Pool-wide health roll-up for operator surfaces
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub total_endpoints: usize,
    pub working: usize,
    pub failed: usize,
    pub blocked: usize,
    pub endpoints: Vec<EndpointReport>,
}
