//! Core scheduling types and algorithms.

pub mod action;
pub mod error;
pub mod gap;
pub mod optimization;
pub mod optimizer;
pub mod profile;
pub mod resource_scheduler;
pub mod resources;
pub mod sched_info;
pub mod score;
pub mod task_scheduler;

pub use action::{Action, ActionId, CoreId, Dispatcher, ImplKey, Implementation};
pub use error::{AppResult, SchedulerError};
pub use gap::{Gap, GapSnapshot};
pub use optimization::OptimizationOutcome;
pub use optimizer::{ScheduleOptimizer, DEFAULT_OPTIMIZATION_INTERVAL};
pub use profile::{Profile, DEFAULT_EXECUTION_TIME_MS};
pub use resource_scheduler::{ResourceId, ResourceScheduler, DEFAULT_DATA_TRANSFER_DELAY_MS};
pub use resources::{ResourceDescription, ResourceKind};
pub use sched_info::{link_resource, unlink_resource, LinksGuard, SchedulingInformation};
pub use score::Score;
pub use task_scheduler::{ResourceSnapshot, TaskScheduler};
