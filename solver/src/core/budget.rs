//! Attempt budgets for the solving loop.
//!
//! Both limits are checked before an attempt starts. An attempt that has begun
//! always runs its full prompt/extract/guess sequence.

/// Why no further attempt may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// The current stage used all of its attempts.
    Stage { attempts: u32 },
    /// The run used all of its attempts across stages.
    Run { total_attempts: u32 },
}

/// Per-stage and per-run attempt counters with their ceilings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptBudget {
    max_total: u32,
    max_per_stage: u32,
    total: u32,
    stage: u32,
}

impl AttemptBudget {
    pub fn new(max_total: u32, max_per_stage: u32) -> Self {
        Self {
            max_total,
            max_per_stage,
            total: 0,
            stage: 0,
        }
    }

    /// Return the exhausted limit, if any. The stage limit is reported first.
    pub fn check(&self) -> Option<Exhausted> {
        if self.stage >= self.max_per_stage {
            return Some(Exhausted::Stage {
                attempts: self.stage,
            });
        }
        if self.total >= self.max_total {
            return Some(Exhausted::Run {
                total_attempts: self.total,
            });
        }
        None
    }

    /// Count one attempt against both limits.
    pub fn begin_attempt(&mut self) {
        self.total += 1;
        self.stage += 1;
    }

    /// Reset the per-stage counter after a stage is solved.
    pub fn next_stage(&mut self) {
        self.stage = 0;
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }
}
