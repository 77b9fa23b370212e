//! Wiring from configuration to a ready-to-use task scheduler.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::action::Dispatcher;
use crate::core::error::SchedulerError;
use crate::core::resource_scheduler::ResourceScheduler;
use crate::core::task_scheduler::TaskScheduler;

/// Builds a [`TaskScheduler`] from validated configuration.
///
/// Resource ids are assigned by sorted worker name so a configuration maps
/// to the same ids on every run.
pub fn build_task_scheduler(
    cfg: &SchedulerConfig,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<Arc<TaskScheduler>, SchedulerError> {
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let mut names: Vec<&String> = cfg.resources.keys().collect();
    names.sort();
    let resources = names
        .into_iter()
        .enumerate()
        .map(|(id, name)| {
            let declared = &cfg.resources[name];
            Arc::new(ResourceScheduler::new(
                id,
                name.clone(),
                declared.to_description(),
                cfg.data_transfer_delay_ms,
            ))
        })
        .collect();
    Ok(Arc::new(TaskScheduler::new(resources, dispatcher)))
}
