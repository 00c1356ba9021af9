//! Network quality monitor.
//!
//! Smooths throughput, latency and failure rate over completed attempts with
//! an exponential moving average and buckets the result into a
//! [`QualityTier`].

use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;
const KIB: f64 = 1024.0;

/// Coarse network condition, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityTier {
    /// Classifies smoothed metrics. A tier requires both its throughput floor
    /// and its failure-rate ceiling.
    pub fn classify(throughput: f64, failure_rate: f64) -> Self {
        if throughput >= MIB && failure_rate <= 0.05 {
            QualityTier::Excellent
        } else if throughput >= 256.0 * KIB && failure_rate <= 0.15 {
            QualityTier::Good
        } else if throughput >= 32.0 * KIB && failure_rate <= 0.35 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Poor => "poor",
            QualityTier::Fair => "fair",
            QualityTier::Good => "good",
            QualityTier::Excellent => "excellent",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the sender's network estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityEstimate {
    /// Smoothed throughput of successful attempts, bytes/second.
    pub throughput: f64,
    pub failure_rate: f64,
    pub rtt: Option<Duration>,
    pub tier: QualityTier,
    pub attempts: u64,
    pub failures: u64,
    /// Chunk size the planner recommends for the next transfer.
    pub next_chunk_size: u64,
}

impl QualityEstimate {
    /// Share of attempts that succeeded, 1.0 before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 1.0;
        }
        (self.attempts - self.failures) as f64 / self.attempts as f64
    }
}

pub struct NetworkQualityMonitor {
    alpha: f64,
    throughput: Option<f64>,
    failure_rate: Option<f64>,
    latency: Option<f64>,
    attempts: u64,
    failures: u64,
}

impl NetworkQualityMonitor {
    /// Creates a monitor with smoothing factor `alpha`, clamped to `(0, 1]`.
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            0.3
        };
        Self {
            alpha,
            throughput: None,
            failure_rate: None,
            latency: None,
            attempts: 0,
            failures: 0,
        }
    }

    /// Folds one attempt outcome into the averages.
    pub fn record(&mut self, success: bool, bytes: u64, elapsed: Duration) {
        self.attempts += 1;
        let outcome = if success { 0.0 } else { 1.0 };
        self.failure_rate = Some(ema(self.failure_rate, outcome, self.alpha));

        if success {
            let secs = elapsed.as_secs_f64().max(0.001);
            self.throughput = Some(ema(self.throughput, bytes as f64 / secs, self.alpha));
            self.latency = Some(ema(self.latency, elapsed.as_secs_f64(), self.alpha));
        } else {
            self.failures += 1;
        }
    }

    pub fn current_tier(&self) -> QualityTier {
        if self.attempts == 0 {
            return QualityTier::Good;
        }
        QualityTier::classify(self.throughput(), self.failure_rate())
    }

    pub fn throughput(&self) -> f64 {
        self.throughput.unwrap_or(0.0)
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate.unwrap_or(0.0)
    }

    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.latency.map(Duration::from_secs_f64)
    }

    /// Current estimate. `next_chunk_size` is left at zero for the
    /// publisher to fill in from its planner.
    pub fn snapshot(&self) -> QualityEstimate {
        QualityEstimate {
            throughput: self.throughput(),
            failure_rate: self.failure_rate(),
            rtt: self.estimated_rtt(),
            tier: self.current_tier(),
            attempts: self.attempts,
            failures: self.failures,
            next_chunk_size: 0,
        }
    }
}

fn ema(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}
