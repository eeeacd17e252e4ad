//! Backoff policy for rate-limit rejections

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::SchedulerConfig;
use crate::llm::RateLimitMetadata;

/// Upper bound (exclusive) on random jitter added to exponential backoff
const MAX_JITTER: Duration = Duration::from_secs(1);

/// Retry ceiling and backoff computation
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    margin: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            margin: config.retry_margin(),
            max_backoff: config.max_backoff(),
        }
    }

    /// True once `rejections` rate-limit failures leave no retry budget
    pub fn is_exhausted(&self, rejections: u32) -> bool {
        rejections > self.max_retries
    }

    /// Delay before retrying after the `attempt`-th rejection (1-based)
    pub fn compute_backoff(&self, attempt: u32, metadata: &RateLimitMetadata) -> Duration {
        let jitter = Duration::from_millis(rand::rng().random_range(0..MAX_JITTER.as_millis() as u64));
        self.backoff_with_jitter(attempt, metadata, jitter)
    }

    /// Deterministic core of [`compute_backoff`](Self::compute_backoff)
    ///
    /// A service retry hint wins and gets the safety margin added.
    /// Otherwise `2^attempt` seconds plus jitter, capped at the ceiling.
    pub fn backoff_with_jitter(&self, attempt: u32, metadata: &RateLimitMetadata, jitter: Duration) -> Duration {
        if let Some(hint) = metadata.retry_after {
            let delay = hint + self.margin;
            debug!(attempt, ?hint, ?delay, "RetryPolicy::backoff: using service hint");
            return delay;
        }

        let exponential = Duration::from_secs(2u64.saturating_pow(attempt));
        let delay = exponential.saturating_add(jitter).min(self.max_backoff);
        debug!(attempt, ?delay, "RetryPolicy::backoff: exponential");
        delay
    }
}
