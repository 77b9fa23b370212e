//! Schedulable actions and the dispatch seam.
//!
//! An [`Action`] is an opaque unit of work produced by the upstream
//! dependency-graph builder. This crate only reads its data-dependency
//! edges and decides where and when it should run; launching the work is
//! delegated to a [`Dispatcher`] implementation owned by the embedding
//! runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::resource_scheduler::ResourceId;
use crate::core::resources::ResourceDescription;
use crate::core::sched_info::SchedulingInformation;

/// Unique action identifier, assigned by the upstream graph builder.
pub type ActionId = u64;

/// Identifier of an action kind (core element).
pub type CoreId = usize;

/// Key of an implementation inside the per-resource profile maps.
pub type ImplKey = (CoreId, usize);

/// A concrete executable variant of an action kind, with its own resource
/// requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    core_id: CoreId,
    impl_id: usize,
    requirements: ResourceDescription,
}

impl Implementation {
    /// Creates an implementation descriptor.
    pub fn new(core_id: CoreId, impl_id: usize, requirements: ResourceDescription) -> Self {
        Self {
            core_id,
            impl_id,
            requirements,
        }
    }

    /// Profile-map key for this implementation.
    pub fn key(&self) -> ImplKey {
        (self.core_id, self.impl_id)
    }

    /// Action kind this implementation belongs to.
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    /// Resource requirements of this implementation.
    pub fn requirements(&self) -> &ResourceDescription {
        &self.requirements
    }
}

/// A schedulable unit of work.
///
/// Immutable identity fields are set at construction; dependency lists grow
/// as the upstream builder discovers edges, and are always *snapshotted*
/// under their lock before iteration so concurrent mutation cannot be
/// observed mid-walk.
pub struct Action {
    id: ActionId,
    core_id: CoreId,
    priority: i32,
    implementations: Vec<Implementation>,
    data_predecessors: RwLock<Vec<Arc<Action>>>,
    constraining_predecessors: RwLock<Vec<Arc<Action>>>,
    assigned_implementation: RwLock<Option<Implementation>>,
    assigned_resource: RwLock<Option<ResourceId>>,
    /// Wall-clock launch timestamp in ms; negative until launched.
    start_time: AtomicI64,
    running: AtomicBool,
    info: SchedulingInformation,
}

impl Action {
    /// Creates a new action with its candidate implementations.
    pub fn new(
        id: ActionId,
        core_id: CoreId,
        priority: i32,
        implementations: Vec<Implementation>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            core_id,
            priority,
            implementations,
            data_predecessors: RwLock::new(Vec::new()),
            constraining_predecessors: RwLock::new(Vec::new()),
            assigned_implementation: RwLock::new(None),
            assigned_resource: RwLock::new(None),
            start_time: AtomicI64::new(-1),
            running: AtomicBool::new(false),
            info: SchedulingInformation::new(),
        })
    }

    /// Unique identifier.
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Action kind.
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    /// Intrinsic priority; higher schedules first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Candidate implementations for this action.
    pub fn implementations(&self) -> &[Implementation] {
        &self.implementations
    }

    /// Per-action scheduling state.
    pub fn info(&self) -> &SchedulingInformation {
        &self.info
    }

    /// Registers a data-flow producer of this action.
    pub fn add_data_predecessor(&self, predecessor: Arc<Action>) {
        self.data_predecessors.write().push(predecessor);
    }

    /// Snapshot of the data predecessors, taken under the list lock.
    pub fn data_predecessors(&self) -> Vec<Arc<Action>> {
        self.data_predecessors.read().clone()
    }

    /// Registers a fallback target used when dispatch fails.
    pub fn add_constraining_predecessor(&self, predecessor: Arc<Action>) {
        self.constraining_predecessors.write().push(predecessor);
    }

    /// Snapshot of the constraining predecessors.
    pub fn constraining_predecessors(&self) -> Vec<Arc<Action>> {
        self.constraining_predecessors.read().clone()
    }

    /// Binds the action to a resource and implementation pair.
    pub fn assign(&self, resource: ResourceId, implementation: Implementation) {
        *self.assigned_resource.write() = Some(resource);
        *self.assigned_implementation.write() = Some(implementation);
    }

    /// The currently assigned implementation, if any.
    pub fn assigned_implementation(&self) -> Option<Implementation> {
        self.assigned_implementation.read().clone()
    }

    /// The currently assigned resource, if any.
    pub fn assigned_resource(&self) -> Option<ResourceId> {
        self.assigned_resource.read().as_ref().copied()
    }

    /// Assigned to a resource but not yet physically launched.
    pub fn is_pending(&self) -> bool {
        self.assigned_resource().is_some() && !self.is_running()
    }

    /// Whether the action has been physically dispatched.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Observed launch timestamp, once dispatched.
    pub fn start_time(&self) -> Option<i64> {
        let ts = self.start_time.load(Ordering::Acquire);
        (ts >= 0).then_some(ts)
    }

    /// Records the physical launch of the action.
    pub fn mark_launched(&self, now_ms: i64) {
        self.start_time.store(now_ms.max(0), Ordering::Release);
        self.running.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("core_id", &self.core_id)
            .field("priority", &self.priority)
            .field("scheduled", &self.info.is_scheduled())
            .finish()
    }
}

/// Seam towards the execution layer: physically launches an action.
///
/// Implementations must not block; a launch that cannot proceed yet returns
/// [`SchedulerError::InvalidScheduling`] and the scheduler reacts by
/// retrying on a constraining predecessor's resource.
pub trait Dispatcher: Send + Sync + 'static {
    /// Attempts to dispatch the action on its assigned resource.
    fn try_launch(&self, action: &Arc<Action>) -> Result<(), SchedulerError>;
}
