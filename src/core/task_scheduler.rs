//! Top-level task scheduler.
//!
//! Owns the per-resource schedulers, computes action-level scores, routes
//! placement and removal requests to the right timeline, recovers dispatch
//! failures through constraining-predecessor fallback, and controls the
//! background optimizer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::action::{Action, Dispatcher, Implementation};
use crate::core::error::{AppResult, SchedulerError};
use crate::core::gap::GapSnapshot;
use crate::core::optimizer::ScheduleOptimizer;
use crate::core::resource_scheduler::{ResourceId, ResourceScheduler};
use crate::core::score::Score;
use crate::util::clock::now_ms;

/// Serializable monitoring view of one resource timeline.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    /// Worker name.
    pub name: String,
    /// Current spare-capacity intervals.
    pub gaps: Vec<GapSnapshot>,
    /// Dispatched actions still present on the timeline.
    pub running: Vec<crate::core::action::ActionId>,
    /// Whether an optimization pass is in flight.
    pub optimizing: bool,
    /// Unschedulings parked for the next optimization pass.
    pub pending_unschedulings: usize,
}

/// Scheduler over a pool of heterogeneous worker resources.
pub struct TaskScheduler {
    resources: Vec<Arc<ResourceScheduler>>,
    dispatcher: Arc<dyn Dispatcher>,
    optimizer: Mutex<Option<ScheduleOptimizer>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Creates a scheduler over the given resources. Resource ids must
    /// match their position in the slice.
    pub fn new(resources: Vec<Arc<ResourceScheduler>>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        debug_assert!(resources.iter().enumerate().all(|(i, r)| r.id() == i));
        Self {
            resources,
            dispatcher,
            optimizer: Mutex::new(None),
        }
    }

    /// The registered resource schedulers.
    pub fn resources(&self) -> &[Arc<ResourceScheduler>] {
        &self.resources
    }

    /// Looks up a resource by id.
    pub fn resource(&self, id: ResourceId) -> Option<&Arc<ResourceScheduler>> {
        self.resources.get(id)
    }

    /// Action-intrinsic score: priority first, then the time at which its
    /// input data is expected to exist.
    pub fn action_score(&self, action: &Arc<Action>) -> Score {
        let data_time = action
            .data_predecessors()
            .iter()
            .map(|p| p.info().expected_end())
            .max()
            .unwrap_or(0);
        Score::for_action(i64::from(action.priority()), data_time)
    }

    /// Chooses the best (resource, implementation) pair by two-level
    /// scoring and places the action there.
    pub fn schedule(&self, action: &Arc<Action>) -> Result<(), SchedulerError> {
        let action_score = self.action_score(action);
        let mut best: Option<(Arc<ResourceScheduler>, Implementation, Score)> = None;
        for resource in &self.resources {
            let resource_score = resource.resource_score(action, &action_score);
            for implementation in action.implementations() {
                if !resource.capacity().can_host(implementation.requirements()) {
                    continue;
                }
                let score =
                    resource.implementation_score(action, implementation, &resource_score);
                if best.as_ref().map_or(true, |(_, _, b)| score.is_better_than(b)) {
                    best = Some((resource.clone(), implementation.clone(), score));
                }
            }
        }
        let Some((resource, implementation, score)) = best else {
            warn!(action = action.id(), "no resource can host the action");
            return Err(SchedulerError::Blocked(action.id()));
        };
        debug!(
            action = action.id(),
            resource = %resource.name(),
            ?score,
            "best candidate selected"
        );
        action.assign(resource.id(), implementation);
        resource.schedule_action(action)
    }

    /// Removes an action from its resource's timeline and returns the
    /// successors that became immediately dispatchable.
    pub fn unschedule(&self, action: &Arc<Action>) -> Result<Vec<Arc<Action>>, SchedulerError> {
        let id = action
            .assigned_resource()
            .ok_or(SchedulerError::Unassigned(action.id()))?;
        let resource = self
            .resource(id)
            .ok_or(SchedulerError::UnknownResource(id))?;
        Ok(resource.unschedule_action(action))
    }

    /// Dispatches an action; on refusal, retries on each constraining
    /// predecessor's resource in turn. Errors other than a refusal
    /// propagate unchanged.
    pub fn launch_with_fallback(&self, action: &Arc<Action>) -> Result<(), SchedulerError> {
        match self.dispatcher.try_launch(action) {
            Ok(()) => {
                action.mark_launched(now_ms());
                return Ok(());
            }
            Err(SchedulerError::InvalidScheduling(_)) => {}
            Err(other) => return Err(other),
        }
        warn!(action = action.id(), "dispatch refused; trying constraining predecessors");
        for fallback in action.constraining_predecessors() {
            let Some(resource_id) = fallback.assigned_resource() else {
                continue;
            };
            let Some(resource) = self.resource(resource_id) else {
                continue;
            };
            let Some(implementation) = best_implementation_on(resource, action) else {
                continue;
            };
            if action.assigned_resource().is_some() {
                let _ = self.unschedule(action);
            }
            action.assign(resource.id(), implementation);
            if let Err(err) = resource.schedule_action(action) {
                warn!(action = action.id(), %err, "fallback placement failed");
                continue;
            }
            match self.dispatcher.try_launch(action) {
                Ok(()) => {
                    action.mark_launched(now_ms());
                    info!(
                        action = action.id(),
                        resource = %resource.name(),
                        "launched on fallback resource"
                    );
                    return Ok(());
                }
                Err(SchedulerError::InvalidScheduling(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(SchedulerError::InvalidScheduling(action.id()))
    }

    /// Feeds an observed execution time back into the profile of the
    /// action's implementation on its resource.
    pub fn register_execution(&self, action: &Arc<Action>, elapsed_ms: i64) {
        let (Some(resource_id), Some(implementation)) =
            (action.assigned_resource(), action.assigned_implementation())
        else {
            return;
        };
        if let Some(resource) = self.resource(resource_id) {
            resource.register_execution(implementation.key(), elapsed_ms);
        }
    }

    /// Starts the background optimizer; a no-op if it is already running.
    pub fn start_optimizer(self: &Arc<Self>, interval: Duration) -> AppResult<()> {
        let mut slot = self.optimizer.lock();
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(ScheduleOptimizer::start(self, interval)?);
        Ok(())
    }

    /// Stops and joins the background optimizer, if running.
    pub fn shutdown(&self) {
        if let Some(optimizer) = self.optimizer.lock().take() {
            optimizer.shutdown();
        }
    }

    /// One optimization round: local re-optimization per resource, dispatch
    /// fallback for refused launches, then one balancing sweep.
    pub fn run_optimization_round(&self) {
        let epoch = now_ms();
        let mut per_resource: Vec<(Arc<ResourceScheduler>, Vec<Arc<Action>>)> = Vec::new();
        for resource in &self.resources {
            let outcome = resource.local_optimization(epoch, self.dispatcher.as_ref());
            for failed in outcome.launch_failures {
                if let Err(err) = self.launch_with_fallback(&failed) {
                    warn!(action = failed.id(), %err, "dispatch delayed: no fallback succeeded");
                }
            }
            per_resource.push((resource.clone(), outcome.rescheduled));
        }
        self.balance(per_resource);
    }

    /// Moves work from the most loaded resource towards less loaded ones
    /// when a receiver would finish it sooner than its current expected
    /// end.
    fn balance(&self, mut per_resource: Vec<(Arc<ResourceScheduler>, Vec<Arc<Action>>)>) {
        if per_resource.len() < 2 {
            return;
        }
        // The donor is the resource whose timeline frees up latest.
        per_resource.sort_by_key(|(r, _)| r.first_gap_start());
        let Some((donor, mut candidates)) = per_resource.pop() else {
            return;
        };
        let receivers: Vec<Arc<ResourceScheduler>> =
            per_resource.into_iter().map(|(r, _)| r).collect();
        // Latest-finishing candidates are donated first.
        candidates.sort_by_key(|a| std::cmp::Reverse(a.info().expected_end()));
        for candidate in candidates {
            if candidate.is_running() || !candidate.info().is_scheduled() {
                continue;
            }
            let current_end = candidate.info().expected_end();
            for receiver in &receivers {
                let Some(implementation) = best_implementation_on(receiver, &candidate) else {
                    continue;
                };
                let duration = receiver.profile_average(implementation.key()).unwrap_or(0);
                if current_end <= receiver.first_gap_start().saturating_add(duration) {
                    continue;
                }
                donor.unschedule_action(&candidate);
                candidate.assign(receiver.id(), implementation);
                if let Err(err) = receiver.schedule_action(&candidate) {
                    warn!(action = candidate.id(), %err, "donation placement failed");
                    continue;
                }
                info!(
                    action = candidate.id(),
                    from = %donor.name(),
                    to = %receiver.name(),
                    "action migrated by balancer"
                );
                return;
            }
        }
    }

    /// Read-only monitoring snapshot of every resource timeline.
    pub fn snapshots(&self) -> Vec<ResourceSnapshot> {
        self.resources
            .iter()
            .map(|r| ResourceSnapshot {
                name: r.name().to_string(),
                gaps: r.gap_snapshots(),
                running: r.running_action_ids(),
                optimizing: r.is_optimizing(),
                pending_unschedulings: r.pending_unschedulings_len(),
            })
            .collect()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(optimizer) = self.optimizer.get_mut().take() {
            optimizer.shutdown();
        }
    }
}

/// Fastest implementation of `action` that `resource` can host, preferring
/// learned averages and falling back to declaration order.
fn best_implementation_on(
    resource: &Arc<ResourceScheduler>,
    action: &Arc<Action>,
) -> Option<Implementation> {
    let mut best: Option<(i64, Implementation)> = None;
    for implementation in action.implementations() {
        if !resource.capacity().can_host(implementation.requirements()) {
            continue;
        }
        let duration = resource
            .profile_average(implementation.key())
            .unwrap_or(i64::MAX);
        if best.as_ref().map_or(true, |(d, _)| duration < *d) {
            best = Some((duration, implementation.clone()));
        }
    }
    best.map(|(_, i)| i)
}
