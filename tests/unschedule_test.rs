//! Removal semantics: re-linking, freed successors, deferral during
//! optimization.

mod support;

use gapline::core::ResourceScheduler;
use support::{cpu, cpu_action, cpu_impl, verify_symmetry};

fn scheduler() -> ResourceScheduler {
    ResourceScheduler::new(0, "worker0", cpu(4), 200)
}

#[test]
fn test_freed_successor_after_unschedule() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 4);
    a.assign(0, cpu_impl(4));
    rs.schedule_action(&a).unwrap();

    let b = cpu_action(2, 4);
    b.add_data_predecessor(a.clone());
    b.assign(0, cpu_impl(4));
    rs.schedule_action(&b).unwrap();

    // b's only resource predecessor is a, so removing a frees it.
    let freed = rs.unschedule_action(&a);
    assert_eq!(freed.len(), 1);
    assert_eq!(freed[0].id(), 2);
    assert!(!a.info().is_scheduled());
    verify_symmetry(&[a, b]);
}

#[test]
fn test_successor_with_other_predecessors_is_not_freed() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    // Two producers each holding half the capacity, then a consumer that
    // needs everything both of them release.
    let a = cpu_action(1, 2);
    a.assign(0, cpu_impl(2));
    rs.schedule_action(&a).unwrap();
    let b = cpu_action(2, 2);
    b.assign(0, cpu_impl(2));
    rs.schedule_action(&b).unwrap();
    let c = cpu_action(3, 4);
    c.assign(0, cpu_impl(4));
    rs.schedule_action(&c).unwrap();

    {
        let guard = c.info().lock_links();
        assert_eq!(c.info().resource_predecessors(&guard).len(), 2);
    }
    let freed = rs.unschedule_action(&a);
    assert!(freed.is_empty(), "c still waits for b");
    {
        let guard = c.info().lock_links();
        let preds = c.info().resource_predecessors(&guard);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].id(), 2);
    }
    verify_symmetry(&[a, b, c]);
}

#[test]
fn test_transitive_relink_preserves_ordering() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    // a -> b -> c through capacity; removing b must relink a -> c.
    let a = cpu_action(1, 4);
    a.assign(0, cpu_impl(4));
    rs.schedule_action(&a).unwrap();
    let b = cpu_action(2, 4);
    b.assign(0, cpu_impl(4));
    rs.schedule_action(&b).unwrap();
    let c = cpu_action(3, 4);
    c.assign(0, cpu_impl(4));
    rs.schedule_action(&c).unwrap();

    let freed = rs.unschedule_action(&b);
    assert!(freed.is_empty(), "c inherits a as predecessor");
    {
        let guard = c.info().lock_links();
        let preds = c.info().resource_predecessors(&guard);
        assert!(preds.iter().any(|p| p.id() == 1));
        assert!(preds.iter().all(|p| p.id() != 2));
    }
    verify_symmetry(&[a, b, c]);
}

#[test]
fn test_unschedule_during_optimization_is_deferred() {
    let rs = scheduler();
    let a = cpu_action(1, 2);
    a.assign(0, cpu_impl(2));
    rs.schedule_action(&a).unwrap();

    a.info().set_on_optimization(true);
    rs.unschedule_action(&a);
    assert_eq!(rs.pending_unschedulings_len(), 1);

    // The next pass drains the parked entry.
    let dispatcher = support::RecordingDispatcher::new();
    rs.local_optimization(0, &dispatcher);
    assert_eq!(rs.pending_unschedulings_len(), 0);
}

#[test]
fn test_unschedule_is_reentrant_safe_for_repeated_cycles() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 4);
    for _ in 0..3 {
        a.assign(0, cpu_impl(4));
        rs.schedule_action(&a).unwrap();
        assert!(a.info().is_scheduled());
        rs.unschedule_action(&a);
        assert!(!a.info().is_scheduled());
        rs.clear();
    }
}
