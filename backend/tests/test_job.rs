//! Tests for job classification and queue routing

use carbon_scheduler_core_rs::models::job::{
    ConfigError, Job, JobId, LengthClass, QueueConfig, QueueKind, ResourceClass, TraceJob,
    SHORT_QUEUE_BOUNDARY,
};
use carbon_scheduler_core_rs::TICKS_PER_HOUR;

const HOUR: usize = TICKS_PER_HOUR;

#[test]
fn test_length_class_table() {
    let cases = [
        (1, LengthClass::UpTo2),
        (2 * HOUR, LengthClass::UpTo2),
        (2 * HOUR + 1, LengthClass::UpTo6),
        (4 * HOUR, LengthClass::UpTo6),
        (8 * HOUR, LengthClass::UpTo12),
        (16 * HOUR, LengthClass::UpTo24),
        (48 * HOUR, LengthClass::UpTo48),
        (48 * HOUR + 1, LengthClass::Over48),
    ];
    for (duration, expected) in cases {
        assert_eq!(LengthClass::from_ticks(duration), expected, "duration {duration}");
    }
}

#[test]
fn test_length_classes_are_ordered() {
    assert!(LengthClass::UpTo2 < LengthClass::UpTo6);
    assert!(LengthClass::UpTo48 < LengthClass::Over48);
    assert!(LengthClass::UpTo2.is_shortest());
    assert!(!LengthClass::UpTo6.is_shortest());
}

#[test]
fn test_resource_class_table() {
    let cases = [
        (1, "1"),
        (2, "2"),
        (3, "3-4"),
        (4, "3-4"),
        (8, "5-8"),
        (16, "9-16"),
        (32, "17-32"),
        (64, "33-64"),
        (65, "64+"),
    ];
    for (cpus, label) in cases {
        assert_eq!(ResourceClass::from_cpus(cpus).label(), label, "cpus {cpus}");
    }
}

#[test]
fn test_parse_two_queues_in_hours() {
    let queues = QueueConfig::parse_waiting_times("6x24").unwrap();
    assert_eq!(queues.waiting_budgets(), &[6 * HOUR, 24 * HOUR]);
}

#[test]
fn test_three_queues_rejected() {
    assert_eq!(
        QueueConfig::parse_waiting_times("1x2x3"),
        Err(ConfigError::UnsupportedQueueCount(3))
    );
}

#[test]
fn test_negative_waiting_time_rejected() {
    assert!(matches!(
        QueueConfig::parse_waiting_times("-1"),
        Err(ConfigError::InvalidWaitingTimes { .. })
    ));
}

#[test]
fn test_routing_at_the_boundary() {
    let queues = QueueConfig::new(vec![10, 20]).unwrap();

    let short = Job::new(JobId(1), 0, SHORT_QUEUE_BOUNDARY - 1, 1, &queues);
    assert_eq!(short.queue(), QueueKind::Short);
    assert_eq!(short.waiting_budget(), 10);

    let long = Job::new(JobId(2), 0, SHORT_QUEUE_BOUNDARY, 1, &queues);
    assert_eq!(long.queue(), QueueKind::Long);
    assert_eq!(long.waiting_budget(), 20);
}

#[test]
fn test_single_queue_expected_duration_is_two() {
    let queues = QueueConfig::new(vec![100]).unwrap();
    let job = Job::new(JobId(1), 0, 5000, 4, &queues);
    assert_eq!(job.queue(), QueueKind::Same);
    assert_eq!(job.expected_duration(), 2);
    assert_eq!(job.planning_horizon(), 5000);
}

#[test]
fn test_trace_averages_feed_expected_duration() {
    let queues = QueueConfig::new(vec![0, 0])
        .unwrap()
        .with_trace_averages(&[100, 300, 2000, 4000]);
    let job = TraceJob::new(9, 0, 50, 1).classify(&queues);
    assert_eq!(job.expected_duration(), 200);
    assert_eq!(job.planning_horizon(), 200);

    let long = TraceJob::new(10, 0, 1500, 1).classify(&queues);
    assert_eq!(long.expected_duration(), 3000);
}

#[test]
fn test_unobserved_queue_uses_own_duration() {
    let queues = QueueConfig::new(vec![0, 0]).unwrap();
    let job = Job::new(JobId(1), 0, 77, 1, &queues);
    assert_eq!(job.expected_duration(), 77);
}

#[test]
fn test_representative_keeps_identity_and_budget() {
    let queues = QueueConfig::new(vec![30, 60]).unwrap().with_averages(10.0, 5000.0);
    let job = Job::new(JobId(4), 12, 500, 3, &queues);
    let stand_in = job.representative();
    assert_eq!(stand_in.id(), JobId(4));
    assert_eq!(stand_in.duration(), 10);
    assert_eq!(stand_in.cpus(), 3);
    assert_eq!(stand_in.waiting_budget(), 30);
}

#[test]
fn test_reserved_grant_lifecycle() {
    let queues = QueueConfig::new(vec![0]).unwrap();
    let mut job = Job::new(JobId(1), 0, 10, 2, &queues);
    assert_eq!(job.reserved_grant(), None);
    job.set_reserved_grant(2);
    assert_eq!(job.reserved_grant(), Some(2));
}
