//! Health-biased weighted endpoint selection
//!
//! Selection is a pure function over the endpoint list, the statistics map,
//! the caller's exclusion set, the clock, and an RNG. Keeping it free of
//! I/O and shared state makes the weighting rules testable in isolation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::{EndpointStats, ProxyEndpoint};

/// Weight floor; a struggling endpoint stays selectable, which matters when
/// the pool is small
pub const MIN_WEIGHT: f64 = 0.01;

/// Selection weight for one endpoint
///
/// No recorded history weighs 1.0. With history, the success rate scales to
/// a 0..=10 base, then the failure streak and block count divide it down; a
/// block inside the cooldown window divides five times harder than an old
/// one. Never returns less than [`MIN_WEIGHT`].
pub fn endpoint_weight(stats: Option<&EndpointStats>, now: DateTime<Utc>) -> f64 {
    let mut weight = 1.0;

    if let Some(stats) = stats {
        if stats.total_requests > 0 {
            weight = stats.success_rate() * 10.0;

            if stats.consecutive_failures > 0 {
                weight /= (stats.consecutive_failures * 2) as f64;
            }

            if stats.blocked_count > 0 {
                let multiplier = if stats.in_block_cooldown(now) { 10.0 } else { 2.0 };
                weight /= stats.blocked_count as f64 * multiplier;
            }
        }
    }

    weight.max(MIN_WEIGHT)
}

/// Pick one endpoint by cumulative-weight draw
///
/// Excluded keys are filtered out first; when that empties the candidate
/// set, the draw falls back to the full pool, because reusing a failed
/// endpoint beats dispatching nothing. Returns `None` only when `pool`
/// itself is empty.
pub fn select_endpoint<'a, R: Rng + ?Sized>(
    pool: &'a [ProxyEndpoint],
    stats: &HashMap<String, EndpointStats>,
    excluded: &HashSet<String>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Option<&'a ProxyEndpoint> {
    if pool.is_empty() {
        return None;
    }

    let mut candidates: Vec<&ProxyEndpoint> = pool
        .iter()
        .filter(|endpoint| !excluded.contains(&endpoint.key()))
        .collect();
    if candidates.is_empty() {
        candidates = pool.iter().collect();
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|endpoint| endpoint_weight(stats.get(&endpoint.key()), now))
        .collect();

    // The floor keeps the total positive; the uniform draw guards the
    // degenerate case anyway.
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        let idx = rng.gen_range(0..candidates.len());
        return Some(candidates[idx]);
    }

    let mut remaining = rng.gen_range(0.0..total);
    for (endpoint, weight) in candidates.iter().copied().zip(weights.iter()) {
        remaining -= weight;
        if remaining <= 0.0 {
            return Some(endpoint);
        }
    }

    // Floating-point dust can leave a sliver past the last bucket.
    candidates.last().copied()
}
