//! Local re-optimization of one resource's timeline.
//!
//! Duration estimates drift: the actual execution times observed at runtime
//! rarely match the averages used at placement time. This module rebuilds a
//! resource's future schedule from scratch by replaying every scheduled and
//! pending action through a discrete-event simulation, then atomically
//! installs the corrected gap list.
//!
//! While a pass is in flight, new placements are queued on the timeline
//! state (`op_queue`) instead of mutating the gap list, and unschedulings of
//! actions the pass owns are parked in `pending_unschedulings`; both are
//! drained by the pass itself. Only the final commit holds the timeline
//! lock, so concurrent placements are blocked for the swap, not for the
//! simulation.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::action::{Action, ActionId, Dispatcher};
use crate::core::gap::{insert_gap, Gap};
use crate::core::resource_scheduler::ResourceScheduler;
use crate::core::resources::ResourceDescription;
use crate::core::sched_info::{link_resource, LinksGuard};
use crate::util::clock::now_ms;

/// Result of one local optimization pass.
#[derive(Default)]
pub struct OptimizationOutcome {
    /// Actions whose placement was rebuilt by the pass.
    pub rescheduled: Vec<Arc<Action>>,
    /// Actions whose dispatch was refused during the replay; the caller
    /// retries them against their constraining predecessors' resources.
    pub launch_failures: Vec<Arc<Action>>,
}

/// Links guards held for the duration of a pass, keyed by action id.
///
/// Every acquisition is a `try_lock`: a failure means a concurrent
/// unscheduling owns the action, and the pass treats it as already resolved.
#[derive(Default)]
struct LockTable {
    guards: HashMap<ActionId, (Arc<Action>, LinksGuard)>,
}

impl LockTable {
    fn holds(&self, id: ActionId) -> bool {
        self.guards.contains_key(&id)
    }

    fn try_lock(&mut self, action: &Arc<Action>) -> bool {
        if self.holds(action.id()) {
            return true;
        }
        match action.info().try_lock_links() {
            Some(guard) => {
                self.guards.insert(action.id(), (action.clone(), guard));
                true
            }
            None => false,
        }
    }

    fn guard(&self, id: ActionId) -> Option<&LinksGuard> {
        self.guards.get(&id).map(|(_, g)| g)
    }

    fn release(&mut self, id: ActionId) {
        self.guards.remove(&id);
    }

    /// Drops every guard, clearing the on-optimization flag first.
    fn release_all(&mut self) {
        for (_, (action, _)) in self.guards.drain() {
            action.info().set_on_optimization(false);
        }
    }
}

/// Selectable actions: resource and data constraints resolved, waiting only
/// for capacity. Kept ordered by priority (descending), then id.
#[derive(Default)]
struct SelectableSet {
    entries: Vec<Arc<Action>>,
}

impl SelectableSet {
    fn rank(action: &Arc<Action>) -> (i64, ActionId) {
        (-i64::from(action.priority()), action.id())
    }

    fn offer(&mut self, action: &Arc<Action>) {
        if self.entries.iter().any(|e| e.id() == action.id()) {
            return;
        }
        let pos = self
            .entries
            .partition_point(|e| Self::rank(e) <= Self::rank(action));
        self.entries.insert(pos, action.clone());
    }

    fn peek(&self) -> Option<&Arc<Action>> {
        self.entries.first()
    }

    fn poll(&mut self) -> Option<Arc<Action>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    fn drain(&mut self) -> Vec<Arc<Action>> {
        std::mem::take(&mut self.entries)
    }
}

/// Ready actions: external data dependencies resolve at a known time.
/// Min-heap on (expected availability, id); keys are captured at insertion.
#[derive(Default)]
struct ReadyQueue {
    heap: BinaryHeap<std::cmp::Reverse<ReadyEntry>>,
}

struct ReadyEntry {
    start: i64,
    id: ActionId,
    action: Arc<Action>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.start, self.id) == (other.start, other.id)
    }
}
impl Eq for ReadyEntry {}
impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.start, self.id).cmp(&(other.start, other.id))
    }
}

impl ReadyQueue {
    fn push(&mut self, action: &Arc<Action>) {
        self.heap.push(std::cmp::Reverse(ReadyEntry {
            start: action.info().expected_start(),
            id: action.id(),
            action: action.clone(),
        }));
    }

    fn peek_start(&self) -> Option<i64> {
        self.heap.peek().map(|e| e.0.start)
    }

    fn pop(&mut self) -> Option<Arc<Action>> {
        self.heap.pop().map(|e| e.0.action)
    }
}

/// Scan worklist: max-heap on (expected start, id), so later actions are
/// visited before the predecessors they depend on.
struct ScanEntry {
    start: i64,
    id: ActionId,
    action: Arc<Action>,
}

impl ScanEntry {
    fn new(action: &Arc<Action>) -> Self {
        Self {
            start: action.info().expected_start(),
            id: action.id(),
            action: action.clone(),
        }
    }
}

impl PartialEq for ScanEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.start, self.id) == (other.start, other.id)
    }
}
impl Eq for ScanEntry {}
impl PartialOrd for ScanEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScanEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.start, self.id).cmp(&(other.start, other.id))
    }
}

/// Simulation event kinds. At equal timestamps End sorts before Start so
/// freed capacity is visible to the starts that need it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    End,
    Start,
}

struct EventEntry {
    time: i64,
    kind: EventKind,
    id: ActionId,
    action: Arc<Action>,
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.kind, self.id) == (other.time, other.kind, other.id)
    }
}
impl Eq for EventEntry {}
impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.kind, self.id).cmp(&(other.time, other.kind, other.id))
    }
}

#[derive(Default)]
struct EventQueue {
    heap: BinaryHeap<std::cmp::Reverse<EventEntry>>,
}

impl EventQueue {
    fn push(&mut self, time: i64, kind: EventKind, action: Arc<Action>) {
        let id = action.id();
        self.heap.push(std::cmp::Reverse(EventEntry {
            time,
            kind,
            id,
            action,
        }));
    }

    fn pop(&mut self) -> Option<(i64, EventKind, Arc<Action>)> {
        self.heap
            .pop()
            .map(|e| (e.0.time, e.0.kind, e.0.action))
    }
}

/// Replay state: the gap list being rebuilt, seeded with the resource's
/// full capacity at time zero.
struct LocalOptimizationState {
    gaps: Vec<Gap>,
}

impl LocalOptimizationState {
    fn new(capacity: ResourceDescription) -> Self {
        Self {
            gaps: vec![Gap::new(0, i64::MAX, None, capacity)],
        }
    }

    /// Consumes `requirements` from the gap list, returning the origins of
    /// every gap that contributed capacity. Consumption may be partial when
    /// the list cannot cover the requirements.
    fn reserve(&mut self, requirements: &ResourceDescription) -> Vec<Arc<Action>> {
        let mut remaining = requirements.clone();
        let mut origins = Vec::new();
        let mut consumed = Vec::new();
        for (index, gap) in self.gaps.iter_mut().enumerate() {
            if remaining.is_depleted() {
                break;
            }
            let reduction = gap.resources_mut().reduce_common(&mut remaining);
            if !reduction.is_depleted() {
                if let Some(origin) = gap.origin() {
                    origins.push(origin.clone());
                }
            }
            if gap.resources().is_depleted() {
                consumed.push(index);
            }
        }
        for index in consumed.into_iter().rev() {
            self.gaps.remove(index);
        }
        origins
    }

    /// Earliest timestamp by which the current gaps cover `requirements`,
    /// or `None` when they cannot.
    fn coverage_start(&self, requirements: &ResourceDescription) -> Option<i64> {
        let mut remaining = requirements.clone();
        let mut bound = 0i64;
        for gap in &self.gaps {
            if remaining.is_depleted() {
                break;
            }
            let before = remaining.clone();
            remaining.subtract_capped(gap.resources());
            if remaining != before {
                bound = bound.max(gap.start());
            }
        }
        remaining.is_depleted().then_some(bound)
    }

    /// Records the capacity an action frees at its expected end.
    fn release(&mut self, at: i64, origin: Arc<Action>, resources: ResourceDescription) {
        insert_gap(
            &mut self.gaps,
            Gap::new(at.max(0), i64::MAX, Some(origin), resources),
        );
    }

    fn into_gaps(self) -> Vec<Gap> {
        self.gaps
    }
}

struct DataAnalysis {
    has_internal: bool,
    has_external: bool,
    start_time: i64,
}

impl ResourceScheduler {
    /// Rebuilds this resource's future schedule from scratch.
    ///
    /// `epoch_ms` is the wall-clock origin of the rebuilt timeline: observed
    /// launch timestamps are pinned relative to it, and all expected times
    /// produced by the pass are offsets from it.
    pub fn local_optimization(
        &self,
        epoch_ms: i64,
        dispatcher: &dyn Dispatcher,
    ) -> OptimizationOutcome {
        info!(resource = %self.name(), epoch_ms, "local optimization started");
        let mut outcome = OptimizationOutcome::default();
        let mut locks = LockTable::default();
        let mut running: Vec<Arc<Action>> = Vec::new();
        let mut selectable = SelectableSet::default();
        let mut ready = ReadyQueue::default();

        // 1. Open the arrival queue and snapshot the current gap origins.
        let origins: Vec<Arc<Action>> = {
            let mut state = self.state.lock();
            state.op_queue = Some(Vec::new());
            state.gaps.iter().filter_map(|g| g.origin().cloned()).collect()
        };

        // 2. Scan backwards from the gap origins over both edge kinds.
        let mut scan_queue: BinaryHeap<ScanEntry> = BinaryHeap::new();
        for origin in origins {
            if origin.info().is_on_optimization() {
                continue;
            }
            if locks.try_lock(&origin) {
                origin.info().set_on_optimization(true);
                scan_queue.push(ScanEntry::new(&origin));
            }
        }
        while let Some(entry) = scan_queue.pop() {
            let action = entry.action;
            if !action.info().is_scheduled() {
                // Already executed or concurrently unscheduled.
                action.info().set_on_optimization(false);
                locks.release(action.id());
                continue;
            }
            let analysis = self.analyze_data_dependencies(&action, &mut locks);
            let mut has_resource_preds = false;
            let rpreds = locks
                .guard(action.id())
                .map(|g| action.info().resource_predecessors(g))
                .unwrap_or_default();
            for rpred in rpreds {
                let newly = !locks.holds(rpred.id());
                if locks.try_lock(&rpred) {
                    if rpred.info().is_scheduled() {
                        has_resource_preds = true;
                        if !rpred.info().is_on_optimization() {
                            rpred.info().set_on_optimization(true);
                            scan_queue.push(ScanEntry::new(&rpred));
                        } else if newly {
                            locks.release(rpred.id());
                        }
                    } else if newly {
                        locks.release(rpred.id());
                    }
                }
            }
            action.info().set_expected_start(analysis.start_time);
            action.info().set_to_reschedule(true);
            self.classify(
                &action,
                &analysis,
                has_resource_preds,
                &mut running,
                &mut selectable,
                &mut ready,
                &mut locks,
            );
        }

        // 3. Classify placements that arrived since the queue opened, then
        // resolve the dependents of mid-pass unschedulings.
        let arrivals: Vec<Arc<Action>> = {
            let mut state = self.state.lock();
            state.op_queue.as_mut().map(std::mem::take).unwrap_or_default()
        };
        for action in arrivals {
            if !action.info().is_scheduled() || !locks.try_lock(&action) {
                continue;
            }
            action.info().set_on_optimization(true);
            action.info().set_to_reschedule(true);
            let analysis = self.analyze_data_dependencies(&action, &mut locks);
            action.info().set_expected_start(analysis.start_time);
            self.classify(
                &action,
                &analysis,
                true,
                &mut running,
                &mut selectable,
                &mut ready,
                &mut locks,
            );
        }
        let pending: Vec<Arc<Action>> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.pending_unschedulings)
        };
        for unscheduled in pending {
            let successors = match unscheduled.info().try_lock_links() {
                Some(guard) => {
                    unscheduled.info().set_on_optimization(false);
                    unscheduled.info().take_optimizing_successors(&guard)
                }
                None => {
                    self.state.lock().pending_unschedulings.push(unscheduled.clone());
                    continue;
                }
            };
            for successor in successors {
                if !successor.info().is_scheduled() || !locks.try_lock(&successor) {
                    continue;
                }
                successor.info().set_on_optimization(true);
                successor.info().set_to_reschedule(true);
                let analysis = self.analyze_data_dependencies(&successor, &mut locks);
                successor.info().set_expected_start(analysis.start_time);
                self.classify(
                    &successor,
                    &analysis,
                    true,
                    &mut running,
                    &mut selectable,
                    &mut ready,
                    &mut locks,
                );
            }
        }

        // 4. Replay.
        let mut sim = LocalOptimizationState::new(self.capacity().clone());
        let mut events = EventQueue::default();
        for action in &running {
            self.pin_running(action, epoch_ms, &mut sim, &mut locks);
            events.push(action.info().expected_end(), EventKind::End, action.clone());
        }
        // Launch whatever fits in the capacity left over by running work.
        loop {
            let Some(top) = selectable.peek().cloned() else { break };
            let Some(implementation) = top.assigned_implementation() else {
                warn!(action = top.id(), "selectable action without implementation; skipping");
                selectable.poll();
                continue;
            };
            if sim.coverage_start(implementation.requirements()).is_none() {
                break;
            }
            selectable.poll();
            self.pin_running(&top, epoch_ms, &mut sim, &mut locks);
            match dispatcher.try_launch(&top) {
                Ok(()) => {
                    top.mark_launched(now_ms());
                    events.push(top.info().expected_end(), EventKind::End, top.clone());
                    outcome.rescheduled.push(top);
                }
                Err(err) => {
                    warn!(action = top.id(), %err, "dispatch refused during replay");
                    outcome.launch_failures.push(top);
                }
            }
        }
        // Discrete-event loop.
        loop {
            while let Some((time, kind, action)) = events.pop() {
                match kind {
                    EventKind::End => self.process_end(
                        &action,
                        time,
                        &mut sim,
                        &mut locks,
                        &mut selectable,
                        &mut ready,
                        &mut events,
                        &mut outcome,
                    ),
                    EventKind::Start => self.process_start(
                        &action,
                        time,
                        &mut sim,
                        &mut locks,
                        &mut events,
                        &mut outcome,
                    ),
                }
            }
            match ready.pop() {
                Some(top) => {
                    if !top.info().is_to_reschedule() {
                        continue;
                    }
                    top.info().set_to_reschedule(false);
                    let start = top.info().expected_start();
                    events.push(start, EventKind::Start, top);
                }
                None => break,
            }
        }

        // 5. Commit: release every held guard first (placement locks are
        // re-taken fresh, keeping the state-before-links order), install
        // the rebuilt gap list, then re-place whatever the replay could
        // not start (and its blocked dependents) and the placements that
        // arrived during the pass.
        let leftovers = selectable.drain();
        locks.release_all();
        {
            let mut state = self.state.lock();
            state.gaps = sim.into_gaps();
            let mut worklist: std::collections::VecDeque<Arc<Action>> = leftovers.into();
            while let Some(action) = worklist.pop_front() {
                action.info().set_on_optimization(false);
                if !action.info().is_scheduled() || !action.info().is_to_reschedule() {
                    continue;
                }
                action.info().set_to_reschedule(false);
                let dependents = match action.info().try_lock_links() {
                    Some(guard) => {
                        action.info().clear_resource_links(&guard);
                        action.info().take_optimizing_successors(&guard)
                    }
                    // Mid-unschedule; its own pass cleans up.
                    None => continue,
                };
                if let Err(err) = self.schedule_using_gaps(&action, &mut state) {
                    warn!(action = action.id(), %err, "re-placement after replay failed");
                } else {
                    outcome.rescheduled.push(action.clone());
                }
                worklist.extend(dependents);
            }
            let late_arrivals = state.op_queue.take().unwrap_or_default();
            for action in late_arrivals {
                if !action.info().is_scheduled() {
                    continue;
                }
                if let Err(err) = self.schedule_using_gaps(&action, &mut state) {
                    warn!(action = action.id(), %err, "deferred placement failed at commit");
                } else {
                    outcome.rescheduled.push(action);
                }
            }
        }
        info!(
            resource = %self.name(),
            rescheduled = outcome.rescheduled.len(),
            launch_failures = outcome.launch_failures.len(),
            "local optimization committed"
        );
        outcome
    }

    /// Walks a snapshot of the action's data predecessors, recording this
    /// action as an optimizing successor of every still-scheduled producer
    /// on this resource.
    fn analyze_data_dependencies(
        &self,
        action: &Arc<Action>,
        locks: &mut LockTable,
    ) -> DataAnalysis {
        let mut analysis = DataAnalysis {
            has_internal: false,
            has_external: false,
            start_time: 0,
        };
        for predecessor in action.data_predecessors() {
            if predecessor.assigned_resource() == Some(self.id()) {
                let newly = !locks.holds(predecessor.id());
                if locks.try_lock(&predecessor) {
                    if predecessor.info().is_scheduled() {
                        analysis.has_internal = true;
                        if let Some(guard) = locks.guard(predecessor.id()) {
                            predecessor
                                .info()
                                .add_optimizing_successor(guard, action.clone());
                        }
                    }
                    if newly {
                        locks.release(predecessor.id());
                    }
                }
                // A failed try-lock means the predecessor is mid-unschedule:
                // no constraint recorded for this pass.
            } else {
                analysis.has_external = true;
                analysis.start_time = analysis
                    .start_time
                    .max(predecessor.info().expected_end());
            }
        }
        analysis
    }

    #[allow(clippy::too_many_arguments)]
    fn classify(
        &self,
        action: &Arc<Action>,
        analysis: &DataAnalysis,
        has_resource_preds: bool,
        running: &mut Vec<Arc<Action>>,
        selectable: &mut SelectableSet,
        ready: &mut ReadyQueue,
        locks: &mut LockTable,
    ) {
        if analysis.has_internal {
            // An unresolved producer on this same resource decides its fate;
            // it re-enters classification through the optimizing successors.
            locks.release(action.id());
            return;
        }
        if analysis.has_external {
            if analysis.start_time == 0 {
                selectable.offer(action);
            } else {
                ready.push(action);
            }
        } else if has_resource_preds {
            selectable.offer(action);
        } else {
            running.push(action.clone());
        }
    }

    /// Pins an in-flight (or immediately startable) action: its observed
    /// start is kept, its capacity is reserved from time zero, and its
    /// ordering edges are rebuilt from scratch.
    fn pin_running(
        &self,
        action: &Arc<Action>,
        epoch_ms: i64,
        sim: &mut LocalOptimizationState,
        locks: &mut LockTable,
    ) {
        let start = action.start_time().map(|ts| ts - epoch_ms).unwrap_or(0);
        action.info().set_expected_start(start);
        let duration = action
            .assigned_implementation()
            .and_then(|i| self.profile_average(i.key()))
            .unwrap_or(0);
        action
            .info()
            .set_expected_end(start.saturating_add(duration).max(0));
        locks.try_lock(action);
        if let Some(guard) = locks.guard(action.id()) {
            action.info().clear_resource_links(guard);
        }
        action.info().set_to_reschedule(false);
        if let Some(implementation) = action.assigned_implementation() {
            let _ = sim.reserve(implementation.requirements());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_end(
        &self,
        action: &Arc<Action>,
        time: i64,
        sim: &mut LocalOptimizationState,
        locks: &mut LockTable,
        selectable: &mut SelectableSet,
        ready: &mut ReadyQueue,
        events: &mut EventQueue,
        outcome: &mut OptimizationOutcome,
    ) {
        action.info().set_on_optimization(false);
        // Promote ready actions whose external dependencies have resolved.
        while ready.peek_start().is_some_and(|s| s <= time) {
            if let Some(promoted) = ready.pop() {
                selectable.offer(&promoted);
            }
        }
        self.release_data_successors(action, time, selectable, ready, locks);
        if let Some(implementation) = action.assigned_implementation() {
            sim.release(time, action.clone(), implementation.requirements().clone());
        }
        // Start everything the freed capacity now allows, best first.
        loop {
            let Some(top) = selectable.peek().cloned() else { break };
            let Some(implementation) = top.assigned_implementation() else {
                warn!(action = top.id(), "selectable action without implementation; skipping");
                selectable.poll();
                continue;
            };
            let Some(bound) = sim.coverage_start(implementation.requirements()) else {
                break;
            };
            selectable.poll();
            top.info().set_to_reschedule(false);
            let start = bound.max(top.info().expected_start());
            self.process_start(&top, start, sim, locks, events, outcome);
        }
    }

    fn process_start(
        &self,
        action: &Arc<Action>,
        time: i64,
        sim: &mut LocalOptimizationState,
        locks: &mut LockTable,
        events: &mut EventQueue,
        outcome: &mut OptimizationOutcome,
    ) {
        let Some(implementation) = action.assigned_implementation() else {
            warn!(action = action.id(), "start event for action without implementation");
            return;
        };
        action.info().set_expected_start(time);
        let duration = self.profile_average(implementation.key()).unwrap_or(0);
        let end = time.saturating_add(duration).max(0);
        action.info().set_expected_end(end);

        locks.try_lock(action);
        if let Some(guard) = locks.guard(action.id()) {
            action.info().clear_resource_links(guard);
        }
        let origins = sim.reserve(implementation.requirements());
        for origin in origins {
            locks.try_lock(&origin);
            if let (Some(origin_guard), Some(action_guard)) =
                (locks.guard(origin.id()), locks.guard(action.id()))
            {
                link_resource(&origin, origin_guard, action, action_guard);
            }
        }
        events.push(end, EventKind::End, action.clone());
        outcome.rescheduled.push(action.clone());
        debug!(
            action = action.id(),
            resource = %self.name(),
            start = time,
            end,
            "replayed placement"
        );
    }

    /// Re-classifies the data consumers recorded against `action` once its
    /// end time is known.
    fn release_data_successors(
        &self,
        action: &Arc<Action>,
        time_limit: i64,
        selectable: &mut SelectableSet,
        ready: &mut ReadyQueue,
        locks: &mut LockTable,
    ) {
        locks.try_lock(action);
        let mut successors = match locks.guard(action.id()) {
            Some(guard) => action.info().take_optimizing_successors(guard),
            None => return,
        };
        successors.sort_by_key(|s| s.id());
        successors.dedup_by_key(|s| s.id());
        for successor in successors {
            if !successor.info().is_scheduled() {
                continue;
            }
            let mut missing = 0usize;
            let mut start_time = 0i64;
            for predecessor in successor.data_predecessors() {
                if predecessor.assigned_resource() == Some(self.id())
                    && predecessor.info().is_on_optimization()
                {
                    missing += 1;
                } else {
                    start_time = start_time.max(predecessor.info().expected_end());
                }
            }
            successor.info().set_expected_start(start_time);
            if missing == 0 {
                if !locks.try_lock(&successor) {
                    continue;
                }
                if start_time <= time_limit {
                    selectable.offer(&successor);
                } else {
                    ready.push(&successor);
                }
            }
        }
    }
}
