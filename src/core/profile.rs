//! Learned execution-time profiles.
//!
//! Placement needs a duration estimate for every implementation it
//! considers. Estimates start at a coarse default and converge as the
//! execution-completion path feeds observed durations back in.

use serde::{Deserialize, Serialize};

/// Default estimate used before any execution has been observed.
pub const DEFAULT_EXECUTION_TIME_MS: i64 = 100;

/// Statistical record of the observed execution times of one
/// (action kind, implementation) pair on one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    executions: u64,
    min_ms: i64,
    avg_ms: i64,
    max_ms: i64,
}

impl Profile {
    /// Fresh profile with the default average and no recorded executions.
    pub fn new() -> Self {
        Self {
            executions: 0,
            min_ms: i64::MAX,
            avg_ms: DEFAULT_EXECUTION_TIME_MS,
            max_ms: i64::MIN,
        }
    }

    /// Number of executions folded into this profile.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Current average execution time in milliseconds.
    pub fn average_execution_time(&self) -> i64 {
        self.avg_ms
    }

    /// Shortest observed execution, if any.
    pub fn min_execution_time(&self) -> Option<i64> {
        (self.executions > 0).then_some(self.min_ms)
    }

    /// Longest observed execution, if any.
    pub fn max_execution_time(&self) -> Option<i64> {
        (self.executions > 0).then_some(self.max_ms)
    }

    /// Folds one observed execution into the statistics. The first sample
    /// replaces the default average entirely.
    pub fn register_execution(&mut self, elapsed_ms: i64) {
        let elapsed_ms = elapsed_ms.max(0);
        self.min_ms = self.min_ms.min(elapsed_ms);
        self.max_ms = self.max_ms.max(elapsed_ms);
        let total = self.executions as i64;
        self.avg_ms = if total == 0 {
            elapsed_ms
        } else {
            (self.avg_ms.saturating_mul(total).saturating_add(elapsed_ms)) / (total + 1)
        };
        self.executions += 1;
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}
