//! Builders to construct scheduler components from configuration.

mod scheduler_builder;

pub use scheduler_builder::build_task_scheduler;
