//! Gap-placement behavior of a single resource timeline.

mod support;

use gapline::core::{ResourceKind, ResourceScheduler, Score};
use support::{cpu, cpu_action, cpu_impl, verify_capacity_invariant, verify_symmetry};

fn scheduler() -> ResourceScheduler {
    ResourceScheduler::new(0, "worker0", cpu(4), 200)
}

#[test]
fn test_single_action_fills_the_sentinel_gap() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let action = cpu_action(1, 4);
    action.assign(0, cpu_impl(4));
    rs.schedule_action(&action).unwrap();

    assert_eq!(action.info().expected_start(), 0);
    assert_eq!(action.info().expected_end(), 10);

    let gaps = rs.gap_snapshots();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].start, 10);
    assert_eq!(gaps[0].end, i64::MAX);
    assert_eq!(gaps[0].origin, Some(1));
    assert_eq!(gaps[0].resources.get(ResourceKind::Cpu), 4);
    verify_capacity_invariant(&gaps, &cpu(4));
}

#[test]
fn test_data_dependent_action_starts_at_predecessor_end() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 4);
    a.assign(0, cpu_impl(4));
    rs.schedule_action(&a).unwrap();

    rs.register_execution((0, 1), 5);
    let b = gapline::core::Action::new(2, 0, 0, vec![gapline::core::Implementation::new(0, 1, cpu(4))]);
    b.add_data_predecessor(a.clone());
    b.assign(0, gapline::core::Implementation::new(0, 1, cpu(4)));
    rs.schedule_action(&b).unwrap();

    assert_eq!(b.info().expected_start(), 10);
    assert_eq!(b.info().expected_end(), 15);
    verify_symmetry(&[a, b]);
    verify_capacity_invariant(&rs.gap_snapshots(), &cpu(4));
}

#[test]
fn test_independent_actions_share_capacity_concurrently() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 2);
    a.assign(0, cpu_impl(2));
    rs.schedule_action(&a).unwrap();
    let b = cpu_action(2, 2);
    b.assign(0, cpu_impl(2));
    rs.schedule_action(&b).unwrap();

    // Both fit inside the sentinel gap; neither waits for the other.
    assert_eq!(a.info().expected_start(), 0);
    assert_eq!(b.info().expected_start(), 0);
    verify_symmetry(&[a, b]);
    verify_capacity_invariant(&rs.gap_snapshots(), &cpu(4));
}

#[test]
fn test_capacity_contention_serializes_via_resource_edges() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 4);
    a.assign(0, cpu_impl(4));
    rs.schedule_action(&a).unwrap();
    let b = cpu_action(2, 4);
    b.assign(0, cpu_impl(4));
    rs.schedule_action(&b).unwrap();

    // No data dependency, but b needs the capacity a releases.
    assert_eq!(b.info().expected_start(), 10);
    {
        let guard = b.info().lock_links();
        let preds = b.info().resource_predecessors(&guard);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].id(), 1);
    }
    verify_symmetry(&[a, b]);
}

#[test]
fn test_monotonic_placement() {
    let rs = scheduler();
    rs.register_execution((0, 0), 7);

    let producer = cpu_action(1, 2);
    producer.assign(0, cpu_impl(2));
    rs.schedule_action(&producer).unwrap();

    let consumer = cpu_action(2, 2);
    consumer.add_data_predecessor(producer.clone());
    consumer.assign(0, cpu_impl(2));
    rs.schedule_action(&consumer).unwrap();

    assert!(consumer.info().expected_end() >= consumer.info().expected_start());
    assert!(consumer.info().expected_start() >= producer.info().expected_end());
}

#[test]
fn test_replacement_after_unschedule_and_clear_is_deterministic() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let action = cpu_action(1, 4);
    action.assign(0, cpu_impl(4));
    rs.schedule_action(&action).unwrap();
    let first = (action.info().expected_start(), action.info().expected_end());

    rs.unschedule_action(&action);
    assert!(!action.info().is_scheduled());
    rs.clear();

    rs.schedule_action(&action).unwrap();
    let second = (action.info().expected_start(), action.info().expected_end());
    assert_eq!(first, second);
}

#[test]
fn test_unassigned_action_is_rejected() {
    let rs = scheduler();
    let action = cpu_action(1, 2);
    let err = rs.schedule_action(&action).unwrap_err();
    assert!(matches!(err, gapline::core::SchedulerError::Unassigned(1)));
}

#[test]
fn test_unknown_profile_means_zero_duration() {
    let rs = scheduler();
    let action = cpu_action(1, 2);
    action.assign(0, cpu_impl(2));
    rs.schedule_action(&action).unwrap();
    assert_eq!(action.info().expected_start(), action.info().expected_end());
}

#[test]
fn test_resource_score_prefers_local_predecessors() {
    let rs = scheduler();
    let other = ResourceScheduler::new(1, "worker1", cpu(4), 200);

    let local_pred = cpu_action(1, 2);
    local_pred.assign(0, cpu_impl(2));
    let remote_pred = cpu_action(2, 2);
    remote_pred.assign(2, cpu_impl(2));

    let action = cpu_action(3, 2);
    action.add_data_predecessor(local_pred);
    action.add_data_predecessor(remote_pred);

    let here = rs.resource_score(&action, &Score::ZERO);
    let there = other.resource_score(&action, &Score::ZERO);
    // One predecessor is local to `rs`, none to `other`.
    assert_eq!(here.data_locality, 200);
    assert_eq!(there.data_locality, 400);
    assert!(here.is_better_than(&there));
}

#[test]
fn test_implementation_score_tracks_gap_coverage() {
    let rs = scheduler();
    rs.register_execution((0, 0), 10);

    let a = cpu_action(1, 4);
    a.assign(0, cpu_impl(4));
    rs.schedule_action(&a).unwrap();

    // The only remaining capacity arrives when `a` finishes at t=10.
    let b = cpu_action(2, 4);
    let score = rs.implementation_score(&b, &cpu_impl(4), &Score::ZERO);
    assert_eq!(score.resource_free, 10);
    assert_eq!(score.implementation, 10);
}
