//! Scheduling rank tuples.
//!
//! A [`Score`] is the five-slot rank used to pick a (resource,
//! implementation) pair for an action. Slots are compared lexicographically:
//! the action-intrinsic slot ranks higher-is-better, every later slot is a
//! cost where lower wins. The third slot is always zero in this crate but is
//! kept so ranks stay shape-compatible in logs and snapshots.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Lexicographic scheduling rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Action-intrinsic rank (priority); higher is better.
    pub action: i64,
    /// Data-availability cost: remote-predecessor transfer penalty plus the
    /// time at which input data is expected; lower is better.
    pub data_locality: i64,
    /// Reserved slot, always zero.
    pub waiting: i64,
    /// Timestamp at which the resource can cover the requirements; lower is
    /// better.
    pub resource_free: i64,
    /// Expected execution time of the chosen implementation; lower is
    /// better.
    pub implementation: i64,
}

impl Score {
    /// All-zero score.
    pub const ZERO: Score = Score {
        action: 0,
        data_locality: 0,
        waiting: 0,
        resource_free: 0,
        implementation: 0,
    };

    /// Action-level score: intrinsic rank plus the expected data-ready time.
    pub fn for_action(action: i64, data_locality: i64) -> Self {
        Score {
            action,
            data_locality,
            ..Score::ZERO
        }
    }

    /// True when `self` outranks `other`.
    pub fn is_better_than(&self, other: &Score) -> bool {
        self > other
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.action
            .cmp(&other.action)
            .then_with(|| other.data_locality.cmp(&self.data_locality))
            .then_with(|| other.waiting.cmp(&self.waiting))
            .then_with(|| other.resource_free.cmp(&self.resource_free))
            .then_with(|| other.implementation.cmp(&self.implementation))
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
