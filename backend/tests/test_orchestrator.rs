//! Integration tests for the Orchestrator tick loop
//!
//! These drive complete runs from an arrival trace through the scheduler into
//! the simulated cluster and check the resulting totals and event history.

use carbon_scheduler_core_rs::ledger::InMemorySink;
use carbon_scheduler_core_rs::models::event::Event;
use carbon_scheduler_core_rs::models::job::{ConfigError, QueueKind, TraceJob};
use carbon_scheduler_core_rs::orchestrator::{AverageMode, Orchestrator, SimulationConfig};
use carbon_scheduler_core_rs::{CarbonSeries, CostRates, SimulationError};

fn config(policy: &str, carbon_policy: &str, reserved: u32, waiting: &str) -> SimulationConfig {
    SimulationConfig {
        scheduling_policy: policy.to_string(),
        carbon_policy: carbon_policy.to_string(),
        reserved_instances: reserved,
        waiting_times: waiting.to_string(),
        ..SimulationConfig::default()
    }
}

fn flat(len: usize) -> CarbonSeries {
    CarbonSeries::new("flat", vec![1.0; len])
}

#[test]
fn test_cost_run_totals() {
    let trace = vec![
        TraceJob::new(1, 0, 10, 2),
        TraceJob::new(2, 0, 10, 2),
        TraceJob::new(3, 5, 10, 1),
    ];
    let mut orchestrator =
        Orchestrator::new(config("cost", "oracle", 2, "0"), flat(200), trace).unwrap();
    let summary = orchestrator.run().unwrap();

    let rates = CostRates::default().per_tick();
    // job 1 takes the pool until tick 10, jobs 2 and 3 run on demand
    let on_demand = (2.0 * 10.0 + 10.0) * rates.on_demand;
    let holding = 2.0 * rates.reserved_discount_rate * 15.0 * rates.on_demand;

    assert_eq!(summary.jobs, 3);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.ticks, 6);
    assert_eq!(summary.carbon_cost, 50.0);
    assert!((summary.dollar_cost - (on_demand + holding)).abs() < 1e-12);
}

#[test]
fn test_tick_reports_arrivals() {
    let trace = vec![TraceJob::new(1, 0, 5, 1), TraceJob::new(2, 2, 5, 1)];
    let mut orchestrator =
        Orchestrator::new(config("carbon", "oracle", 1, "0"), flat(100), trace).unwrap();

    let first = orchestrator.tick().unwrap();
    assert_eq!((first.tick, first.num_arrivals, first.pending), (0, 1, 0));
    assert_eq!(orchestrator.tick().unwrap().num_arrivals, 0);
    let third = orchestrator.tick().unwrap();
    assert_eq!((third.tick, third.num_arrivals), (2, 1));
    assert_eq!(orchestrator.current_tick(), 2);
}

#[test]
fn test_unsorted_trace_is_ordered_by_arrival() {
    let trace = vec![TraceJob::new(2, 3, 5, 1), TraceJob::new(1, 0, 5, 1)];
    let mut orchestrator =
        Orchestrator::new(config("cost", "oracle", 4, "0"), flat(100), trace).unwrap();
    orchestrator.run().unwrap();

    let arrivals: Vec<(usize, u64)> = orchestrator
        .event_log()
        .events_of_type("Arrival")
        .iter()
        .map(|event| (event.tick(), event.job_id().map_or(0, |id| id.0)))
        .collect();
    assert_eq!(arrivals, vec![(0, 1), (3, 2)]);
}

#[test]
fn test_zero_duration_jobs_are_dropped() {
    let trace = vec![TraceJob::new(1, 0, 0, 4), TraceJob::new(2, 0, 5, 1)];
    let mut orchestrator =
        Orchestrator::new(config("cost", "oracle", 4, "0"), flat(100), trace).unwrap();
    let summary = orchestrator.run().unwrap();

    assert_eq!(summary.jobs, 1);
    assert_eq!(orchestrator.event_log().events_of_type("Arrival").len(), 1);
    assert_eq!(orchestrator.with_cluster(|cluster| cluster.ledger().records().len()), 1);
}

#[test]
fn test_unschedulable_job_is_rejected_and_run_continues() {
    // the first job cannot fit in the series at all
    let trace = vec![TraceJob::new(1, 0, 500, 1), TraceJob::new(2, 1, 5, 1)];
    let mut orchestrator =
        Orchestrator::new(config("carbon", "oracle", 1, "0"), flat(50), trace).unwrap();
    let summary = orchestrator.run().unwrap();

    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.jobs, 1);
    let rejected = orchestrator.event_log().events_of_type("Rejected");
    assert_eq!(rejected.len(), 1);
    assert!(matches!(rejected[0], Event::Rejected { tick: 0, .. }));
    assert_eq!(summary.carbon_cost, 5.0);
}

#[test]
fn test_suspend_resume_run_uses_low_ticks_only() {
    let mut samples = vec![9.0; 1000];
    for tick in [100, 101, 102, 200, 201, 202] {
        samples[tick] = 1.0;
    }
    let trace = vec![TraceJob::new(1, 0, 5, 1)];
    // half an hour of waiting budget = 360 ticks
    let mut orchestrator = Orchestrator::new(
        config("suspend-resume", "oracle", 0, "0.5"),
        CarbonSeries::new("dips", samples),
        trace,
    )
    .unwrap();
    let summary = orchestrator.run().unwrap();

    assert_eq!(summary.carbon_cost, 5.0);
    assert_eq!(summary.ticks, 201);
    let starts = orchestrator.with_cluster(|cluster| {
        cluster
            .ledger()
            .records()
            .iter()
            .map(|record| (record.start, record.duration))
            .collect::<Vec<_>>()
    });
    assert_eq!(starts, vec![(100, 3), (200, 2)]);
    assert_eq!(orchestrator.event_log().events_of_type("Split").len(), 1);
}

#[test]
fn test_carbon_aware_run_beats_cost_run_on_a_dip() {
    let mut samples = vec![10.0; 3 * 720];
    for sample in &mut samples[720..800] {
        *sample = 1.0;
    }
    let trace = vec![TraceJob::new(1, 0, 80, 1)];

    let mut carbon_run = Orchestrator::new(
        config("carbon", "oracle", 0, "1"),
        CarbonSeries::new("dip", samples.clone()),
        trace.clone(),
    )
    .unwrap();
    let mut cost_run = Orchestrator::new(
        config("cost", "oracle", 4, "1"),
        CarbonSeries::new("dip", samples),
        trace,
    )
    .unwrap();

    let carbon = carbon_run.run().unwrap();
    let cost = cost_run.run().unwrap();
    assert_eq!(carbon.carbon_cost, 80.0);
    assert_eq!(cost.carbon_cost, 800.0);
}

#[test]
fn test_running_averages_follow_arrivals() {
    let mut config = config("cost", "oracle", 9, "1x1");
    config.averages = AverageMode::Running;
    let trace = vec![TraceJob::new(1, 0, 100, 1), TraceJob::new(2, 0, 300, 1)];
    let mut orchestrator = Orchestrator::new(config, flat(1000), trace).unwrap();
    orchestrator.run().unwrap();
    assert_eq!(orchestrator.queues().average_duration(QueueKind::Short), Some(200.0));
    assert_eq!(orchestrator.queues().average_duration(QueueKind::Long), None);
}

#[test]
fn test_trace_averages_are_seeded_up_front() {
    let trace = vec![TraceJob::new(1, 0, 100, 1), TraceJob::new(2, 0, 3000, 1)];
    let orchestrator =
        Orchestrator::new(config("cost", "oracle", 9, "1x1"), flat(5000), trace).unwrap();
    assert_eq!(orchestrator.queues().average_duration(QueueKind::Short), Some(100.0));
    assert_eq!(orchestrator.queues().average_duration(QueueKind::Long), Some(3000.0));
}

#[test]
fn test_finish_is_idempotent_and_logs_holding_once() {
    let trace = vec![TraceJob::new(1, 0, 10, 1)];
    let mut orchestrator =
        Orchestrator::new(config("cost", "oracle", 3, "0"), flat(100), trace).unwrap();
    let first = orchestrator.run().unwrap();
    let second = orchestrator.finish().unwrap();

    assert_eq!(first, second);
    let holding = orchestrator.event_log().events_of_type("ReservedHolding");
    assert_eq!(holding.len(), 1);
}

#[test]
fn test_save_results_hands_report_to_sink() {
    let config = config("carbon-cost", "cst_average", 2, "0");
    let label = config.result_label();
    let trace = vec![TraceJob::new(1, 0, 10, 1), TraceJob::new(2, 1, 10, 3)];
    let mut orchestrator = Orchestrator::new(config, flat(100), trace).unwrap();
    orchestrator.run().unwrap();

    let mut sink = InMemorySink::new();
    let report = orchestrator.save_results(&mut sink).unwrap();
    assert_eq!(sink.reports().len(), 1);
    assert_eq!(report.label, label);
    assert_eq!(report.experiment, orchestrator.experiment());
    assert_eq!(report.task_trace, "pai_new_trace");
    assert_eq!(report.records.len(), 2);
    assert!(report.reserved_holding_cost > 0.0);
}

#[test]
fn test_config_from_json() {
    let config = SimulationConfig::from_json_str(
        r#"{
            "scheduling_policy": "suspend-resume-threshold",
            "carbon_policy": "lowest",
            "reserved_instances": 3,
            "waiting_times": "6x24",
            "rates": {"on_demand_per_hour": 1.0},
            "averages": "running"
        }"#,
    )
    .unwrap();
    assert_eq!(config.rates.on_demand_per_hour, 1.0);
    assert_eq!(config.rates.spot_per_hour, 0.01248);
    assert_eq!(config.averages, AverageMode::Running);
    assert_eq!(config.carbon_trace, "AU-SA");
    assert_eq!(config.result_label(), "suspend-resume-threshold-7000-lowest-AU-SA-3-6x24");
}

#[test]
fn test_bad_config_fails_before_running() {
    let err = Orchestrator::new(config("fifo", "oracle", 1, "0"), flat(10), Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Config(ConfigError::UnknownPolicy {
            kind: "scheduling",
            ..
        })
    ));

    let negative = SimulationConfig::from_json_str(r#"{"rates": {"spot_per_hour": -1.0}}"#);
    assert!(matches!(negative, Err(ConfigError::Invalid(_))));

    let malformed = SimulationConfig::from_json_str("{not json");
    assert!(matches!(malformed, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_experiment_name_tracks_config() {
    let a = config("cost", "oracle", 1, "0");
    let b = config("carbon", "oracle", 1, "0");
    assert_eq!(a.experiment_name(), config("cost", "oracle", 1, "0").experiment_name());
    assert_ne!(a.experiment_name(), b.experiment_name());
}
