//! Single owner of the quality monitor and chunk planner.
//!
//! Workers report attempt outcomes over an mpsc channel; the owner task
//! folds them in and publishes a fresh [`QualityEstimate`] on a `watch`
//! channel that any number of readers can sample.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::SenderConfig;
use crate::planner::AdaptiveChunkPlanner;
use crate::quality::{NetworkQualityMonitor, QualityEstimate, QualityTier};

const REPORT_CHANNEL_SIZE: usize = 256;

/// Outcome of one chunk upload attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub chunk_index: u32,
    /// 1-based attempt number for this chunk.
    pub attempt: u32,
    pub started_at: Instant,
    pub success: bool,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Handle to the owner task. Cloning is cheap; the task stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct AdaptiveHandle {
    reports: mpsc::Sender<AttemptReport>,
    estimate: watch::Receiver<QualityEstimate>,
}

impl AdaptiveHandle {
    /// Spawns the owner task seeded from `config`.
    pub fn spawn(config: &SenderConfig) -> Self {
        let monitor = NetworkQualityMonitor::new(config.ema_alpha);
        let planner = AdaptiveChunkPlanner::new(
            config.initial_chunk_size,
            config.min_chunk_size,
            config.max_chunk_size,
        );
        let initial = QualityEstimate {
            next_chunk_size: planner.next_chunk_size(),
            ..monitor.snapshot()
        };

        let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_SIZE);
        let (estimate_tx, estimate_rx) = watch::channel(initial);
        tokio::spawn(run_owner(monitor, planner, reports_rx, estimate_tx));

        Self {
            reports: reports_tx,
            estimate: estimate_rx,
        }
    }

    pub async fn report(&self, report: AttemptReport) {
        if self.reports.send(report).await.is_err() {
            debug!("quality owner stopped, dropping attempt report");
        }
    }

    pub fn current(&self) -> QualityEstimate {
        *self.estimate.borrow()
    }

    pub fn tier(&self) -> QualityTier {
        self.estimate.borrow().tier
    }

    pub fn next_chunk_size(&self) -> u64 {
        self.estimate.borrow().next_chunk_size
    }

    pub fn subscribe(&self) -> watch::Receiver<QualityEstimate> {
        self.estimate.clone()
    }
}

async fn run_owner(
    mut monitor: NetworkQualityMonitor,
    mut planner: AdaptiveChunkPlanner,
    mut reports: mpsc::Receiver<AttemptReport>,
    estimate: watch::Sender<QualityEstimate>,
) {
    while let Some(report) = reports.recv().await {
        monitor.record(report.success, report.bytes, report.elapsed);
        let tier = monitor.current_tier();
        planner.observe(report.success, tier);

        trace!(
            chunk = report.chunk_index,
            attempt = report.attempt,
            success = report.success,
            tier = %tier,
            next_chunk_size = planner.next_chunk_size(),
            "attempt observed"
        );

        estimate.send_replace(QualityEstimate {
            next_chunk_size: planner.next_chunk_size(),
            ..monitor.snapshot()
        });
    }
}
