//! Gaps: timestamped intervals of spare capacity on one resource.

use std::sync::Arc;

use serde::Serialize;

use crate::core::action::{Action, ActionId};
use crate::core::resources::ResourceDescription;

/// A `[start, end)` interval during which part of a resource's capacity is
/// unused. `origin` is the action whose expected completion frees this
/// capacity; only the sentinel gap of a never-used resource has none.
#[derive(Debug, Clone)]
pub struct Gap {
    start: i64,
    end: i64,
    origin: Option<Arc<Action>>,
    resources: ResourceDescription,
}

impl Gap {
    /// Creates a gap.
    pub fn new(
        start: i64,
        end: i64,
        origin: Option<Arc<Action>>,
        resources: ResourceDescription,
    ) -> Self {
        Self {
            start,
            end,
            origin,
            resources,
        }
    }

    /// The open-ended sentinel gap carrying a resource's full capacity.
    pub fn sentinel(capacity: ResourceDescription) -> Self {
        Self::new(i64::MIN, i64::MAX, None, capacity)
    }

    /// Interval start.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Interval end (exclusive).
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Action whose completion creates this gap, if any.
    pub fn origin(&self) -> Option<&Arc<Action>> {
        self.origin.as_ref()
    }

    /// Residual capacity available in the interval.
    pub fn resources(&self) -> &ResourceDescription {
        &self.resources
    }

    /// Mutable access to the residual capacity, for consumption during
    /// placement.
    pub fn resources_mut(&mut self) -> &mut ResourceDescription {
        &mut self.resources
    }

    /// Read-only snapshot for monitoring consumers.
    pub fn snapshot(&self) -> GapSnapshot {
        GapSnapshot {
            start: self.start,
            end: self.end,
            origin: self.origin.as_ref().map(|a| a.id()),
            resources: self.resources.clone(),
        }
    }
}

/// Serializable view of a [`Gap`] for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct GapSnapshot {
    /// Interval start.
    pub start: i64,
    /// Interval end (exclusive).
    pub end: i64,
    /// Id of the origin action, if any.
    pub origin: Option<ActionId>,
    /// Residual capacity in the interval.
    pub resources: ResourceDescription,
}

/// Inserts `gap` into a start-ordered gap list, after any gap sharing its
/// start time.
pub(crate) fn insert_gap(gaps: &mut Vec<Gap>, gap: Gap) {
    let pos = gaps.partition_point(|g| g.start() <= gap.start());
    gaps.insert(pos, gap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resources::ResourceKind;

    fn cpu(units: u64) -> ResourceDescription {
        ResourceDescription::with(ResourceKind::Cpu, units)
    }

    #[test]
    fn test_insert_keeps_start_order() {
        let mut gaps = vec![Gap::sentinel(cpu(4))];
        insert_gap(&mut gaps, Gap::new(10, i64::MAX, None, cpu(2)));
        insert_gap(&mut gaps, Gap::new(5, i64::MAX, None, cpu(1)));
        let starts: Vec<i64> = gaps.iter().map(Gap::start).collect();
        assert_eq!(starts, vec![i64::MIN, 5, 10]);
    }

    #[test]
    fn test_equal_starts_insert_after() {
        let mut gaps = Vec::new();
        let a = Gap::new(10, i64::MAX, None, cpu(1));
        let b = Gap::new(10, i64::MAX, None, cpu(2));
        insert_gap(&mut gaps, a);
        insert_gap(&mut gaps, b);
        assert_eq!(gaps[0].resources().get(ResourceKind::Cpu), 1);
        assert_eq!(gaps[1].resources().get(ResourceKind::Cpu), 2);
    }

    #[test]
    fn test_snapshot_carries_origin_id() {
        let action = Action::new(7, 0, 0, vec![]);
        let gap = Gap::new(0, 100, Some(action), cpu(2));
        let snap = gap.snapshot();
        assert_eq!(snap.origin, Some(7));
        assert_eq!(snap.start, 0);
    }
}
