//! Configuration models for resources and the optimizer.

mod scheduler;

pub use scheduler::{OptimizerConfig, ResourceConfig, SchedulerConfig};
