//! Adaptive chunk planner.
//!
//! The planner only decides the chunk size a *new* transfer starts with.
//! Once a transfer is planned its partition is fixed, so both sides can keep
//! resuming by chunk index.

use ferry_transfer::{ChunkPlan, TransferError};

use crate::quality::QualityTier;

#[derive(Debug, Clone)]
pub struct AdaptiveChunkPlanner {
    min: u64,
    max: u64,
    target: u64,
    last_tier: Option<QualityTier>,
}

impl AdaptiveChunkPlanner {
    pub fn new(initial: u64, min: u64, max: u64) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            target: initial.clamp(min, max),
            last_tier: None,
        }
    }

    /// Grows the target by half on success; halves it on failure or when the
    /// tier dropped since the previous observation.
    pub fn observe(&mut self, success: bool, tier: QualityTier) {
        let degraded = self.last_tier.is_some_and(|prev| tier < prev);
        self.target = if success && !degraded {
            self.target.saturating_add(self.target / 2).min(self.max)
        } else {
            (self.target / 2).max(self.min)
        };
        self.last_tier = Some(tier);
    }

    pub fn next_chunk_size(&self) -> u64 {
        self.target
    }

    pub fn plan(&self, total_size: u64) -> Result<ChunkPlan, TransferError> {
        ChunkPlan::new(total_size, self.target)
    }
}
