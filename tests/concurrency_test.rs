//! Concurrent scheduling traffic and optimizer lifecycle.

mod support;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use gapline::builders::build_task_scheduler;
use gapline::config::SchedulerConfig;
use gapline::core::{Action, Implementation, TaskScheduler};
use support::{cpu, verify_capacity_invariant, verify_symmetry, RecordingDispatcher};

fn two_worker_scheduler() -> Arc<TaskScheduler> {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "resources": {
                "worker0": { "capacity": { "cpu": 4 } },
                "worker1": { "capacity": { "cpu": 4 } }
            }
        }"#,
    )
    .unwrap();
    build_task_scheduler(&cfg, Arc::new(RecordingDispatcher::new())).unwrap()
}

#[test]
fn test_concurrent_schedule_and_unschedule_keeps_graph_consistent() {
    let scheduler = two_worker_scheduler();
    let threads = 4;
    let per_thread = 40;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || {
                let mut rng = rand::rng();
                let mut mine = Vec::new();
                for i in 0..per_thread {
                    let id = (t * per_thread + i) as u64;
                    let units = rng.random_range(1..=4);
                    let action = Action::new(
                        id,
                        0,
                        0,
                        vec![Implementation::new(0, 0, cpu(units))],
                    );
                    scheduler.schedule(&action).unwrap();
                    mine.push(action);
                    if rng.random_bool(0.3) {
                        if let Some(victim) = mine.pop() {
                            let _ = scheduler.unschedule(&victim);
                        }
                    }
                }
                mine
            })
        })
        .collect();

    let mut survivors = Vec::new();
    for handle in handles {
        survivors.extend(handle.join().unwrap());
    }

    for action in &survivors {
        assert!(action.info().is_scheduled());
        assert!(action.info().expected_end() >= action.info().expected_start());
    }
    verify_symmetry(&survivors);
    for resource in scheduler.resources() {
        verify_capacity_invariant(&resource.gap_snapshots(), resource.capacity());
    }
}

#[test]
fn test_optimizer_rounds_under_concurrent_traffic() {
    let scheduler = two_worker_scheduler();

    let producer = {
        let scheduler = scheduler.clone();
        std::thread::spawn(move || {
            for id in 0..60u64 {
                let action =
                    Action::new(1_000 + id, 0, 0, vec![Implementation::new(0, 0, cpu(2))]);
                scheduler.schedule(&action).unwrap();
                if id % 10 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };
    for _ in 0..5 {
        scheduler.run_optimization_round();
    }
    producer.join().unwrap();
    scheduler.run_optimization_round();

    for resource in scheduler.resources() {
        assert!(!resource.is_optimizing());
        verify_capacity_invariant(&resource.gap_snapshots(), resource.capacity());
    }
}

#[test]
fn test_optimizer_start_and_shutdown_joins_cleanly() {
    let scheduler = two_worker_scheduler();
    let action = Action::new(1, 0, 0, vec![Implementation::new(0, 0, cpu(2))]);
    scheduler.schedule(&action).unwrap();

    scheduler.start_optimizer(Duration::from_millis(10)).unwrap();
    // Second start is a no-op.
    scheduler.start_optimizer(Duration::from_millis(10)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    scheduler.shutdown();
    // Idempotent shutdown.
    scheduler.shutdown();
}
