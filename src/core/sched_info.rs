//! Per-action scheduling state and its locking protocol.
//!
//! Scalar state (flags and expected times) is lock-free; the dependency
//! links live behind one reentrant lock per action. Callers acquire links
//! locks in the fixed order *predecessors → self → successors*, and every
//! mutating accessor takes the guard as a token so the compiler enforces
//! that the lock is actually held. Reentrancy matters: a gap list may carry
//! several gaps with the same origin, so the same links lock can legally be
//! taken twice by one placement pass.
//!
//! Symmetry of the resource edges (`B ∈ A.successors ⟺ A ∈ B.predecessors`)
//! is maintained exclusively by [`link_resource`]/[`unlink_resource`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use lock_api::ArcReentrantMutexGuard;
use parking_lot::{RawMutex, RawThreadId, ReentrantMutex};

use crate::core::action::{Action, ActionId};

/// Dependency links of one action, guarded by the action's links lock.
#[derive(Default)]
pub struct DependencyLinks {
    resource_predecessors: Vec<Arc<Action>>,
    resource_successors: Vec<Arc<Action>>,
    optimizing_successors: Vec<Arc<Action>>,
}

/// Owned guard over an action's [`DependencyLinks`]; also the token proving
/// the lock is held when calling mutating accessors.
pub type LinksGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, RefCell<DependencyLinks>>;

/// Mutable scheduling state attached 1:1 to an [`Action`].
pub struct SchedulingInformation {
    scheduled: AtomicBool,
    on_optimization: AtomicBool,
    to_reschedule: AtomicBool,
    expected_start: AtomicI64,
    expected_end: AtomicI64,
    links: Arc<ReentrantMutex<RefCell<DependencyLinks>>>,
}

impl SchedulingInformation {
    /// Fresh, unscheduled state.
    pub fn new() -> Self {
        Self {
            scheduled: AtomicBool::new(false),
            on_optimization: AtomicBool::new(false),
            to_reschedule: AtomicBool::new(false),
            expected_start: AtomicI64::new(0),
            expected_end: AtomicI64::new(0),
            links: Arc::new(ReentrantMutex::new(RefCell::new(DependencyLinks::default()))),
        }
    }

    /// Whether the action currently occupies a slot on a resource timeline.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Marks the action as scheduled.
    pub fn mark_scheduled(&self) {
        self.scheduled.store(true, Ordering::Release);
    }

    /// Whether an optimization pass currently owns this action.
    pub fn is_on_optimization(&self) -> bool {
        self.on_optimization.load(Ordering::Acquire)
    }

    /// Flags the action as owned by an optimization pass.
    pub fn set_on_optimization(&self, value: bool) {
        self.on_optimization.store(value, Ordering::Release);
    }

    /// Whether the current optimization pass still has to re-place this
    /// action.
    pub fn is_to_reschedule(&self) -> bool {
        self.to_reschedule.load(Ordering::Acquire)
    }

    /// Flags the action for re-placement by the current pass.
    pub fn set_to_reschedule(&self, value: bool) {
        self.to_reschedule.store(value, Ordering::Release);
    }

    /// Expected start, in ms relative to the current rescheduling epoch.
    pub fn expected_start(&self) -> i64 {
        self.expected_start.load(Ordering::Acquire)
    }

    /// Sets the expected start.
    pub fn set_expected_start(&self, value: i64) {
        self.expected_start.store(value, Ordering::Release);
    }

    /// Expected end, in ms relative to the current rescheduling epoch.
    pub fn expected_end(&self) -> i64 {
        self.expected_end.load(Ordering::Acquire)
    }

    /// Sets the expected end.
    pub fn set_expected_end(&self, value: i64) {
        self.expected_end.store(value, Ordering::Release);
    }

    /// Acquires this action's links lock, blocking.
    pub fn lock_links(&self) -> LinksGuard {
        self.links.lock_arc()
    }

    /// Attempts to acquire this action's links lock without blocking. A
    /// failure means another thread (typically an unscheduling pass) owns
    /// the action; the caller treats it as "no constraint discovered".
    pub fn try_lock_links(&self) -> Option<LinksGuard> {
        self.links.try_lock_arc()
    }

    fn assert_guarded(&self, guard: &LinksGuard) {
        debug_assert!(
            std::ptr::eq(&**guard, self.links.data_ptr().cast_const()),
            "links guard does not belong to this action"
        );
    }

    /// Snapshot of the resource predecessors.
    pub fn resource_predecessors(&self, guard: &LinksGuard) -> Vec<Arc<Action>> {
        self.assert_guarded(guard);
        guard.borrow().resource_predecessors.clone()
    }

    /// True when at least one resource predecessor remains.
    pub fn has_resource_predecessors(&self, guard: &LinksGuard) -> bool {
        self.assert_guarded(guard);
        !guard.borrow().resource_predecessors.is_empty()
    }

    /// Snapshot of the resource successors.
    pub fn resource_successors(&self, guard: &LinksGuard) -> Vec<Arc<Action>> {
        self.assert_guarded(guard);
        guard.borrow().resource_successors.clone()
    }

    /// Removes every occurrence of `id` from the predecessor list.
    pub fn remove_resource_predecessor(&self, guard: &LinksGuard, id: ActionId) {
        self.assert_guarded(guard);
        guard
            .borrow_mut()
            .resource_predecessors
            .retain(|p| p.id() != id);
    }

    /// Removes every occurrence of `id` from the successor list.
    pub fn remove_resource_successor(&self, guard: &LinksGuard, id: ActionId) {
        self.assert_guarded(guard);
        guard
            .borrow_mut()
            .resource_successors
            .retain(|s| s.id() != id);
    }

    /// Drops both resource-edge lists. Used when an optimization replay
    /// rebuilds the ordering from scratch.
    pub fn clear_resource_links(&self, guard: &LinksGuard) {
        self.assert_guarded(guard);
        let mut links = guard.borrow_mut();
        links.resource_predecessors.clear();
        links.resource_successors.clear();
    }

    /// Records a data consumer discovered during an optimization scan; it
    /// is re-classified once this action's fate is decided.
    pub fn add_optimizing_successor(&self, guard: &LinksGuard, successor: Arc<Action>) {
        self.assert_guarded(guard);
        guard.borrow_mut().optimizing_successors.push(successor);
    }

    /// Takes (and clears) the optimizing successors.
    pub fn take_optimizing_successors(&self, guard: &LinksGuard) -> Vec<Arc<Action>> {
        self.assert_guarded(guard);
        std::mem::take(&mut guard.borrow_mut().optimizing_successors)
    }

    /// Clears the scheduled flag and both resource-edge lists.
    pub fn unscheduled(&self, guard: &LinksGuard) {
        self.assert_guarded(guard);
        self.scheduled.store(false, Ordering::Release);
        let mut links = guard.borrow_mut();
        links.resource_predecessors.clear();
        links.resource_successors.clear();
    }
}

impl Default for SchedulingInformation {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds the symmetric resource edge `pred → succ`. Both guards must be held.
pub fn link_resource(
    pred: &Arc<Action>,
    pred_guard: &LinksGuard,
    succ: &Arc<Action>,
    succ_guard: &LinksGuard,
) {
    pred.info().assert_guarded(pred_guard);
    succ.info().assert_guarded(succ_guard);
    pred_guard.borrow_mut().resource_successors.push(succ.clone());
    succ_guard.borrow_mut().resource_predecessors.push(pred.clone());
}

/// Removes the symmetric resource edge `pred → succ` (all occurrences).
pub fn unlink_resource(
    pred: &Arc<Action>,
    pred_guard: &LinksGuard,
    succ: &Arc<Action>,
    succ_guard: &LinksGuard,
) {
    pred.info().remove_resource_successor(pred_guard, succ.id());
    succ.info().remove_resource_predecessor(succ_guard, pred.id());
}
