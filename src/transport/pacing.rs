//! Request pacing and retry backoff
//!
//! Both delays are pure functions of their inputs so they can be tested
//! without a clock; `Pacer` is the only stateful piece.

use crate::config::TransportConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Remaining quota at or below which the pause is tripled
const QUOTA_CRITICAL: u32 = 10;

/// Remaining quota at or below which the pause is doubled
const QUOTA_LOW: u32 = 20;

/// Pacing and backoff parameters, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    pub base_ms: u64,
    pub jitter_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
}

impl From<&TransportConfig> for PacingPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            base_ms: config.base_pause_ms,
            jitter_ms: config.jitter_ms,
            backoff_base_ms: config.backoff_base_ms,
            backoff_factor: config.backoff_factor,
            backoff_cap_ms: config.backoff_cap_ms,
        }
    }
}

/// Computes the pause before the next request
///
/// # Arguments
///
/// * `policy` - Pacing parameters
/// * `remaining_quota` - Quota reported by the most recent response
/// * `jitter` - Offset in milliseconds, already sampled within `±jitter_ms`
pub fn pacing_delay(policy: &PacingPolicy, remaining_quota: Option<u32>, jitter: i64) -> Duration {
    let jittered = (policy.base_ms as i64 + jitter).max(0) as u64;
    let floor = match remaining_quota {
        Some(q) if q <= QUOTA_CRITICAL => policy.base_ms.saturating_mul(3),
        Some(q) if q <= QUOTA_LOW => policy.base_ms.saturating_mul(2),
        _ => 0,
    };
    Duration::from_millis(jittered.max(floor))
}

/// Computes the wait before retry number `attempt` (0-based)
///
/// An advertised retry interval wins, clamped to the cap. Otherwise the delay
/// is `base * factor^attempt`, never shorter than the previous delay and never
/// longer than the cap.
pub fn backoff_delay(
    policy: &PacingPolicy,
    attempt: u32,
    previous: Option<Duration>,
    retry_after: Option<Duration>,
) -> Duration {
    let cap = Duration::from_millis(policy.backoff_cap_ms);
    if let Some(advertised) = retry_after {
        return advertised.min(cap);
    }
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let computed = policy.backoff_base_ms as f64 * policy.backoff_factor.powi(exponent);
    let capped = computed.min(policy.backoff_cap_ms as f64).max(0.0) as u64;
    let delay = Duration::from_millis(capped);
    match previous {
        Some(prev) => delay.max(prev).min(cap),
        None => delay,
    }
}

/// Samples a jitter offset in `[-bound, bound]`
pub fn sample_jitter(bound_ms: u64) -> i64 {
    if bound_ms == 0 {
        return 0;
    }
    let bound = bound_ms as i64;
    rand::rng().random_range(-bound..=bound)
}

/// Enforces the pause between consecutive requests of one client
#[derive(Debug)]
pub struct Pacer {
    policy: PacingPolicy,
    last_request: Option<Instant>,
    remaining_quota: Option<u32>,
}

impl Pacer {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            policy,
            last_request: None,
            remaining_quota: None,
        }
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    /// Sleeps until the paced interval since the last request has passed
    pub async fn wait(&mut self) {
        let delay = pacing_delay(
            &self.policy,
            self.remaining_quota,
            sample_jitter(self.policy.jitter_ms),
        );
        if let Some(last) = self.last_request {
            let ready_at = last + delay;
            if ready_at > Instant::now() {
                trace!(delay_ms = delay.as_millis() as u64, "Pacing request");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Records the quota signal of the latest response
    pub fn observe(&mut self, remaining_quota: Option<u32>) {
        if remaining_quota.is_some() {
            self.remaining_quota = remaining_quota;
        }
    }

    pub fn remaining_quota(&self) -> Option<u32> {
        self.remaining_quota
    }
}
