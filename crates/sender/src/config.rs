//! Sender configuration (the `[sender]` table of `ferry.toml`).

use std::time::Duration;

use ferry_protocol::Priority;
use ferry_protocol::constants::{INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Base URL of the coordinator.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_initial_chunk_size")]
    pub initial_chunk_size: u64,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Retries per chunk before the session gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter, as a fraction of the backoff delay.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    /// Number of upload workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of pooled coordinator connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Wait after which a queued chunk is promoted one priority level.
    /// Zero disables aging.
    #[serde(default = "default_aging_threshold_ms")]
    pub aging_threshold_ms: u64,

    /// Smoothing factor of the network quality averages.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub priority: Priority,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:5000".into()
}

fn default_initial_chunk_size() -> u64 {
    INITIAL_CHUNK_SIZE
}

fn default_min_chunk_size() -> u64 {
    MIN_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    MAX_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_fraction() -> f64 {
    0.25
}

fn default_concurrency() -> usize {
    4
}

fn default_pool_size() -> usize {
    4
}

fn default_aging_threshold_ms() -> u64 {
    10_000
}

fn default_ema_alpha() -> f64 {
    0.3
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            initial_chunk_size: default_initial_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
            concurrency: default_concurrency(),
            pool_size: default_pool_size(),
            aging_threshold_ms: default_aging_threshold_ms(),
            ema_alpha: default_ema_alpha(),
            request_timeout_secs: default_request_timeout_secs(),
            priority: Priority::default(),
        }
    }
}

impl SenderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_fraction: self.jitter_fraction,
        }
    }

    pub fn aging_threshold(&self) -> Option<Duration> {
        (self.aging_threshold_ms > 0).then(|| Duration::from_millis(self.aging_threshold_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
