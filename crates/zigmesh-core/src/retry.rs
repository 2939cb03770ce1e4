// ── Capped exponential backoff ──
//
// Shared by the discovery queue and the self-heal loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::duration_ms;

/// Retry budget plus backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub retry_max: u32,
    #[serde(with = "duration_ms")]
    pub base: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(retry_max: u32, base: Duration, max_backoff: Duration) -> Self {
        Self {
            retry_max,
            base,
            max_backoff,
        }
    }

    /// `min(base * 2^exponent, max_backoff)`.
    pub fn backoff(&self, exponent: u32) -> Duration {
        let factor = 1u32.checked_shl(exponent.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff)
    }

    /// Backoff before retry number `attempt` (1-based), i.e. after the
    /// `attempt`-th failure.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff(attempt.saturating_sub(1))
    }

    /// `true` once `attempt` failures exhaust the budget.
    pub const fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.retry_max
    }
}
