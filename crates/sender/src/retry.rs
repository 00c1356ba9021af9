//! Per-chunk retry and backoff.

use std::time::Duration;

use rand::Rng;

use crate::quality::QualityTier;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, connection errors, 5xx: retry with the same bytes.
    Transient,
    /// The coordinator saw a checksum mismatch: re-read the chunk, then retry.
    Integrity,
    /// The request can never succeed as sent.
    Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, recompute: bool },
    GiveUp,
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, without jitter.
    ///
    /// `base × 2^attempt`, doubled on a poor network, capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32, tier: QualityTier) -> Duration {
        let tier_factor = if tier == QualityTier::Poor { 2 } else { 1 };
        self.base_delay
            .saturating_mul(1u32 << attempt.min(30))
            .saturating_mul(tier_factor)
            .min(self.max_delay)
    }

    /// [`base_delay_for`](Self::base_delay_for) plus up to
    /// `jitter_fraction` of it at random.
    pub fn delay_for(&self, attempt: u32, tier: QualityTier) -> Duration {
        let delay = self.base_delay_for(attempt, tier);
        let fraction = self.jitter_fraction.max(0.0);
        if fraction == 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = delay.mul_f64(fraction * rand::thread_rng().r#gen::<f64>());
        delay + jitter
    }
}

/// Attempt bookkeeping for one chunk.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record_failure(
        &mut self,
        class: FailureClass,
        policy: &RetryPolicy,
        tier: QualityTier,
    ) -> RetryDecision {
        self.attempts += 1;
        if class == FailureClass::Protocol || self.attempts > policy.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: policy.delay_for(self.attempts, tier),
            recompute: class == FailureClass::Integrity,
        }
    }
}
