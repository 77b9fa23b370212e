//! Per-resource timeline scheduling.
//!
//! Each worker resource owns a start-ordered list of [`Gap`]s describing
//! its spare capacity over simulated time. Placement carves an action's
//! requirements out of that list, records ordering edges towards the
//! actions whose completions feed it capacity, and appends a terminal gap
//! for the capacity the new action will itself release.
//!
//! Lock order: the timeline lock may be taken *before* per-action links
//! locks, never while one is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::action::{Action, ActionId, ImplKey};
use crate::core::error::SchedulerError;
use crate::core::gap::{insert_gap, Gap, GapSnapshot};
use crate::core::profile::Profile;
use crate::core::resources::ResourceDescription;
use crate::core::sched_info::{link_resource, LinksGuard};
use crate::core::score::Score;

/// Index of a resource inside its owning `TaskScheduler`.
pub type ResourceId = usize;

/// Default penalty, in ms, charged per data predecessor whose output must
/// be moved from another resource.
pub const DEFAULT_DATA_TRANSFER_DELAY_MS: i64 = 200;

/// Mutable timeline state of one resource, under a single mutex.
pub(crate) struct TimelineState {
    /// Spare-capacity intervals, ordered by start time.
    pub(crate) gaps: Vec<Gap>,
    /// `Some` while an optimization pass is in flight; placements arriving
    /// meanwhile are queued here and re-played when the pass commits.
    pub(crate) op_queue: Option<Vec<Arc<Action>>>,
    /// Actions unscheduled while an optimization pass owned them; the pass
    /// resolves their dependents when it reaches the classification step.
    pub(crate) pending_unschedulings: Vec<Arc<Action>>,
}

/// Scheduler for a single worker resource.
pub struct ResourceScheduler {
    id: ResourceId,
    name: String,
    capacity: ResourceDescription,
    data_transfer_delay: i64,
    pub(crate) state: Mutex<TimelineState>,
    profiles: RwLock<HashMap<ImplKey, Profile>>,
}

impl ResourceScheduler {
    /// Creates a scheduler for one worker with the given total capacity.
    pub fn new(
        id: ResourceId,
        name: impl Into<String>,
        capacity: ResourceDescription,
        data_transfer_delay: i64,
    ) -> Self {
        let sentinel = Gap::sentinel(capacity.clone());
        Self {
            id,
            name: name.into(),
            capacity,
            data_transfer_delay,
            state: Mutex::new(TimelineState {
                gaps: vec![sentinel],
                op_queue: None,
                pending_unschedulings: Vec::new(),
            }),
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Resource id inside the owning scheduler.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Human-readable worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total declared capacity.
    pub fn capacity(&self) -> &ResourceDescription {
        &self.capacity
    }

    /*-----------------------------------------------------------------
     * Scores
     *----------------------------------------------------------------*/

    /// Resource-affinity refinement of an action-level score: charges the
    /// transfer delay for every data predecessor that is *not* pending on
    /// this resource and folds in the earliest gap timestamp as an
    /// availability proxy.
    pub fn resource_score(&self, action: &Arc<Action>, action_score: &Score) -> Score {
        let predecessors = action.data_predecessors();
        let local = predecessors
            .iter()
            .filter(|p| p.is_pending() && p.assigned_resource() == Some(self.id))
            .count() as i64;
        let remote = predecessors.len() as i64 - local;
        let first_gap = {
            let state = self.state.lock();
            state.gaps.first().map(|g| g.start().max(0)).unwrap_or(i64::MAX)
        };
        debug!(
            action = action.id(),
            resource = %self.name,
            remote,
            first_gap,
            "resource score"
        );
        Score {
            action: action_score.action,
            data_locality: action_score.data_locality + remote * self.data_transfer_delay,
            waiting: 0,
            resource_free: first_gap,
            implementation: 0,
        }
    }

    /// Implementation-level refinement: the timestamp by which the gap list
    /// covers the implementation's requirements, plus its learned duration.
    pub fn implementation_score(
        &self,
        action: &Arc<Action>,
        implementation: &crate::core::action::Implementation,
        resource_score: &Score,
    ) -> Score {
        let mut remaining = implementation.requirements().clone();
        let mut resource_free = 0i64;
        {
            let state = self.state.lock();
            for gap in &state.gaps {
                remaining.subtract_capped(gap.resources());
                if remaining.is_depleted() {
                    resource_free = gap.start();
                    break;
                }
            }
        }
        let resource_free = resource_free.max(0);
        let duration = self.profile_average(implementation.key()).unwrap_or(0);
        debug!(
            action = action.id(),
            resource = %self.name,
            resource_free,
            duration,
            "implementation score"
        );
        Score {
            action: resource_score.action,
            data_locality: resource_score.data_locality,
            waiting: 0,
            resource_free,
            implementation: duration,
        }
    }

    /*-----------------------------------------------------------------
     * Placement
     *----------------------------------------------------------------*/

    /// Places an action on this resource's timeline, or queues it behind an
    /// in-flight optimization pass.
    pub fn schedule_action(&self, action: &Arc<Action>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if let Some(queue) = state.op_queue.as_mut() {
            action.info().mark_scheduled();
            queue.push(action.clone());
            debug!(
                action = action.id(),
                resource = %self.name,
                "placement deferred behind optimization pass"
            );
            return Ok(());
        }
        self.schedule_using_gaps(action, &mut state)
    }

    /// Gap placement proper. Caller holds the timeline lock.
    pub(crate) fn schedule_using_gaps(
        &self,
        action: &Arc<Action>,
        state: &mut TimelineState,
    ) -> Result<(), SchedulerError> {
        let implementation = action
            .assigned_implementation()
            .ok_or(SchedulerError::Unassigned(action.id()))?;

        // Lower bound from already-scheduled data predecessors; unscheduled
        // ones resolve later through resource-dependency chaining.
        let mut expected_start = 0i64;
        for predecessor in action.data_predecessors() {
            if predecessor.info().is_scheduled() {
                expected_start = expected_start.max(predecessor.info().expected_end());
            }
        }

        let mut remaining = implementation.requirements().clone();
        let mut origins: Vec<Arc<Action>> = Vec::new();

        // Consume gaps: those starting at or before the data-ready time,
        // latest first, then the remainder in ascending order.
        let gaps = &mut state.gaps;
        let split = gaps.partition_point(|g| g.start() <= expected_start);
        let order: Vec<usize> = (0..split).rev().chain(split..gaps.len()).collect();
        let mut consumed: Vec<usize> = Vec::new();
        for index in order {
            if remaining.is_depleted() {
                break;
            }
            if let Some(origin) = gaps[index].origin().cloned() {
                origins.push(origin);
            }
            gaps[index].resources_mut().reduce_common(&mut remaining);
            if gaps[index].resources().is_depleted() {
                consumed.push(index);
            }
        }
        consumed.sort_unstable_by(|a, b| b.cmp(a));
        for index in consumed {
            gaps.remove(index);
        }
        if !remaining.is_depleted() {
            warn!(
                action = action.id(),
                resource = %self.name,
                missing = %remaining,
                "requirements exceed the capacity currently on the timeline"
            );
        }

        // Bind resource predecessors and finalize times. Self is locked
        // first (blocking); origins are then try-locked only — a contended
        // origin is mid-unschedule, and the conservative outcome is the
        // same one its completed unschedule would produce: no constraint.
        {
            let self_guard = action.info().lock_links();
            action.info().mark_scheduled();
            for predecessor in dedup_by_id(origins) {
                let Some(pred_guard) = predecessor.info().try_lock_links() else {
                    continue;
                };
                if predecessor.info().is_scheduled() {
                    expected_start = expected_start.max(predecessor.info().expected_end());
                    link_resource(&predecessor, &pred_guard, action, &self_guard);
                }
            }
        }

        let duration = self.profile_average(implementation.key()).unwrap_or(0);
        let expected_end = expected_start.saturating_add(duration);
        action.info().set_expected_start(expected_start);
        action.info().set_expected_end(expected_end);

        insert_gap(
            gaps,
            Gap::new(
                expected_end,
                i64::MAX,
                Some(action.clone()),
                implementation.requirements().clone(),
            ),
        );
        debug!(
            action = action.id(),
            resource = %self.name,
            expected_start,
            expected_end,
            "action placed"
        );
        Ok(())
    }

    /*-----------------------------------------------------------------
     * Removal
     *----------------------------------------------------------------*/

    /// Removes an action from the timeline graph, re-linking its direct
    /// resource predecessors to its direct successors, and returns the
    /// successors left without any resource predecessor.
    ///
    /// Locks are acquired over the whole neighborhood (predecessors, the
    /// action, successors) in global id order; the neighborhood is
    /// snapshotted first and the acquisition retried if it changed while
    /// the locks were being taken.
    pub fn unschedule_action(&self, action: &Arc<Action>) -> Vec<Arc<Action>> {
        let mut freed = Vec::new();

        let (guards, predecessors, successors) = loop {
            let (predecessors, successors) = {
                let guard = action.info().lock_links();
                (
                    dedup_by_id(action.info().resource_predecessors(&guard)),
                    dedup_by_id(action.info().resource_successors(&guard)),
                )
            };
            let mut neighborhood: Vec<Arc<Action>> = predecessors
                .iter()
                .chain(successors.iter())
                .cloned()
                .chain(std::iter::once(action.clone()))
                .collect();
            neighborhood.sort_by_key(|a| a.id());
            neighborhood.dedup_by_key(|a| a.id());
            let guards: HashMap<ActionId, LinksGuard> = neighborhood
                .iter()
                .map(|a| (a.id(), a.info().lock_links()))
                .collect();

            let self_guard = &guards[&action.id()];
            let current_preds = dedup_by_id(action.info().resource_predecessors(self_guard));
            let current_succs = dedup_by_id(action.info().resource_successors(self_guard));
            if ids_of(&current_preds) == ids_of(&predecessors)
                && ids_of(&current_succs) == ids_of(&successors)
            {
                break (guards, predecessors, successors);
            }
            // Neighborhood changed under us; release everything and retry.
        };

        for predecessor in &predecessors {
            predecessor
                .info()
                .remove_resource_successor(&guards[&predecessor.id()], action.id());
        }
        for successor in &successors {
            let succ_guard = &guards[&successor.id()];
            successor
                .info()
                .remove_resource_predecessor(succ_guard, action.id());
            // One-hop transitive closure: surviving predecessors keep
            // constraining the successor.
            for predecessor in &predecessors {
                if predecessor.info().is_scheduled() {
                    link_resource(predecessor, &guards[&predecessor.id()], successor, succ_guard);
                }
            }
            if !successor.info().has_resource_predecessors(succ_guard) {
                freed.push(successor.clone());
            }
        }

        action.info().unscheduled(&guards[&action.id()]);
        let was_on_optimization = action.info().is_on_optimization();
        drop(guards);

        if was_on_optimization {
            self.state.lock().pending_unschedulings.push(action.clone());
        }
        info!(
            action = action.id(),
            resource = %self.name,
            freed = freed.len(),
            "action unscheduled"
        );
        freed
    }

    /// Resets the timeline to the pristine sentinel gap.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.gaps.clear();
        state.gaps.push(Gap::sentinel(self.capacity.clone()));
        state.pending_unschedulings.clear();
    }

    /// Start time of the earliest gap: a proxy for how soon anything could
    /// begin on this resource.
    pub fn first_gap_start(&self) -> i64 {
        let state = self.state.lock();
        state.gaps.first().map(|g| g.start().max(0)).unwrap_or(0)
    }

    /*-----------------------------------------------------------------
     * Profiles and monitoring
     *----------------------------------------------------------------*/

    /// Learned average duration for an implementation, if any execution has
    /// been observed.
    pub fn profile_average(&self, key: ImplKey) -> Option<i64> {
        let profiles = self.profiles.read();
        profiles
            .get(&key)
            .filter(|p| p.executions() > 0)
            .map(Profile::average_execution_time)
    }

    /// Folds an observed execution time into the implementation's profile.
    pub fn register_execution(&self, key: ImplKey, elapsed_ms: i64) {
        self.profiles
            .write()
            .entry(key)
            .or_default()
            .register_execution(elapsed_ms);
    }

    /// Read-only snapshot of the current gap list.
    pub fn gap_snapshots(&self) -> Vec<GapSnapshot> {
        let state = self.state.lock();
        state.gaps.iter().map(Gap::snapshot).collect()
    }

    /// Ids of the timeline's origin actions that have been physically
    /// dispatched and not yet removed.
    pub fn running_action_ids(&self) -> Vec<ActionId> {
        let state = self.state.lock();
        let mut ids: Vec<ActionId> = state
            .gaps
            .iter()
            .filter_map(|g| g.origin())
            .filter(|a| a.is_running() && a.info().is_scheduled())
            .map(|a| a.id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether an optimization pass currently owns this timeline.
    pub fn is_optimizing(&self) -> bool {
        self.state.lock().op_queue.is_some()
    }

    /// Number of unschedulings parked for the next optimization pass.
    pub fn pending_unschedulings_len(&self) -> usize {
        self.state.lock().pending_unschedulings.len()
    }
}

fn dedup_by_id(mut actions: Vec<Arc<Action>>) -> Vec<Arc<Action>> {
    actions.sort_by_key(|a| a.id());
    actions.dedup_by_key(|a| a.id());
    actions
}

fn ids_of(actions: &[Arc<Action>]) -> Vec<ActionId> {
    actions.iter().map(|a| a.id()).collect()
}
