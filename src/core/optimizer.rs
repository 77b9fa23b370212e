//! Background schedule optimizer.
//!
//! A dedicated worker thread periodically re-optimizes every resource's
//! timeline and runs one round of load balancing between them. Shutdown is
//! a channel send followed by a join, so callers always observe a fully
//! stopped worker.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::core::task_scheduler::TaskScheduler;

/// Default pause between optimization rounds.
pub const DEFAULT_OPTIMIZATION_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before the first round, letting the initial burst of placements
/// settle.
const STARTUP_DELAY: Duration = Duration::from_millis(500);

/// Handle to the background optimization worker.
pub struct ScheduleOptimizer {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
}

impl ScheduleOptimizer {
    /// Spawns the worker. It holds only a weak reference to the scheduler
    /// and exits on its own if the scheduler is dropped.
    pub(crate) fn start(
        scheduler: &Arc<TaskScheduler>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        let weak = Arc::downgrade(scheduler);
        let handle = thread::Builder::new()
            .name("gapline-optimizer".into())
            .spawn(move || run_loop(&weak, interval, &stop_rx))?;
        info!(interval_ms = interval.as_millis() as u64, "schedule optimizer started");
        Ok(Self { handle, stop_tx })
    }

    /// Signals the worker to stop and joins it.
    pub fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("optimizer worker panicked during shutdown");
        } else {
            info!("schedule optimizer stopped");
        }
    }
}

fn run_loop(scheduler: &Weak<TaskScheduler>, interval: Duration, stop_rx: &Receiver<()>) {
    match stop_rx.recv_timeout(STARTUP_DELAY) {
        Err(RecvTimeoutError::Timeout) => {}
        _ => return,
    }
    loop {
        let Some(scheduler) = scheduler.upgrade() else {
            debug!("task scheduler dropped; optimizer exiting");
            return;
        };
        scheduler.run_optimization_round();
        drop(scheduler);
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }
    }
}
