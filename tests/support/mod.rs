//! Shared fixtures for the integration suites: fake dispatchers, graph
//! builders, and invariant verifiers.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use gapline::core::{
    Action, ActionId, Dispatcher, GapSnapshot, Implementation, ResourceDescription, ResourceKind,
    SchedulerError,
};

/// Capacity/requirement vector with a single cpu entry.
pub fn cpu(units: u64) -> ResourceDescription {
    ResourceDescription::with(ResourceKind::Cpu, units)
}

/// Implementation `(0, 0)` requiring `units` cpus.
pub fn cpu_impl(units: u64) -> Implementation {
    Implementation::new(0, 0, cpu(units))
}

/// Action with a single cpu-bound implementation.
pub fn cpu_action(id: ActionId, units: u64) -> Arc<Action> {
    Action::new(id, 0, 0, vec![cpu_impl(units)])
}

/// Dispatcher that records every launch and refuses configured ids.
#[derive(Default)]
pub struct RecordingDispatcher {
    launched: Mutex<Vec<ActionId>>,
    refused: Mutex<HashSet<ActionId>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `try_launch` refuse the given action id.
    pub fn refuse(&self, id: ActionId) {
        self.refused.lock().unwrap().insert(id);
    }

    /// Stops refusing the given action id.
    pub fn accept(&self, id: ActionId) {
        self.refused.lock().unwrap().remove(&id);
    }

    pub fn launched(&self) -> Vec<ActionId> {
        self.launched.lock().unwrap().clone()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn try_launch(&self, action: &Arc<Action>) -> Result<(), SchedulerError> {
        if self.refused.lock().unwrap().contains(&action.id()) {
            return Err(SchedulerError::InvalidScheduling(action.id()));
        }
        self.launched.lock().unwrap().push(action.id());
        Ok(())
    }
}

/// Dispatcher that announces each launch attempt and then blocks until the
/// test releases it; used to hold an optimization pass open mid-replay.
pub struct GatedDispatcher {
    entered: Sender<ActionId>,
    release: Mutex<Receiver<()>>,
}

impl GatedDispatcher {
    pub fn new(entered: Sender<ActionId>, release: Receiver<()>) -> Self {
        Self {
            entered,
            release: Mutex::new(release),
        }
    }
}

impl Dispatcher for GatedDispatcher {
    fn try_launch(&self, action: &Arc<Action>) -> Result<(), SchedulerError> {
        self.entered.send(action.id()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(())
    }
}

/// Asserts that, at every gap boundary, the summed capacity of all gaps
/// covering that instant stays within the declared total.
pub fn verify_capacity_invariant(gaps: &[GapSnapshot], capacity: &ResourceDescription) {
    let points: Vec<i64> = gaps.iter().map(|g| g.start).collect();
    for &point in &points {
        let mut total = ResourceDescription::new();
        for gap in gaps {
            if gap.start <= point && point < gap.end {
                total.add(&gap.resources);
            }
        }
        assert!(
            capacity.can_host(&total),
            "capacity exceeded at t={point}: {total} > {capacity}"
        );
    }
}

/// Asserts resource-edge symmetry over the given set of actions.
pub fn verify_symmetry(actions: &[Arc<Action>]) {
    for action in actions {
        let guard = action.info().lock_links();
        let successors = action.info().resource_successors(&guard);
        let predecessors = action.info().resource_predecessors(&guard);
        drop(guard);
        for successor in successors {
            let sg = successor.info().lock_links();
            assert!(
                successor
                    .info()
                    .resource_predecessors(&sg)
                    .iter()
                    .any(|p| p.id() == action.id()),
                "action {} lists {} as successor but the inverse edge is missing",
                action.id(),
                successor.id()
            );
        }
        for predecessor in predecessors {
            let pg = predecessor.info().lock_links();
            assert!(
                predecessor
                    .info()
                    .resource_successors(&pg)
                    .iter()
                    .any(|s| s.id() == action.id()),
                "action {} lists {} as predecessor but the inverse edge is missing",
                action.id(),
                predecessor.id()
            );
        }
    }
}
