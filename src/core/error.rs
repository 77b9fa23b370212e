//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::action::ActionId;
use crate::core::resource_scheduler::ResourceId;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Dispatch refused the action on its currently assigned resource.
    /// Recovered locally by retrying on a constraining predecessor's
    /// resource; the optimization path never surfaces it past this crate.
    #[error("action {0} cannot launch on its assigned resource")]
    InvalidScheduling(ActionId),
    /// No registered resource can host any of the action's implementations.
    #[error("action {0} is blocked: no resource can host it")]
    Blocked(ActionId),
    /// Placement was requested before an implementation was assigned.
    #[error("action {0} has no assigned implementation")]
    Unassigned(ActionId),
    /// A resource id that is not part of this scheduler was referenced.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
