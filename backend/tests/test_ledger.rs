//! Tests for the resource ledger and the simulated cluster

use carbon_scheduler_core_rs::ledger::{
    Cluster, Disposition, InMemorySink, JsonFileSink, Ledger, LedgerError, ResultSink, RunReport,
    SimulationCluster, TickRates,
};
use carbon_scheduler_core_rs::models::job::{Job, JobId, QueueConfig};
use carbon_scheduler_core_rs::{CarbonSeries, CostRates, TICKS_PER_HOUR};
use std::sync::Arc;

fn rates() -> TickRates {
    TickRates {
        on_demand: 0.01,
        spot: 0.002,
        reserved_discount_rate: 0.4,
    }
}

fn job(id: u64, arrival: usize, duration: usize, cpus: u32) -> Job {
    let queues = QueueConfig::new(vec![0]).unwrap();
    Job::new(JobId(id), arrival, duration, cpus, &queues)
}

fn cluster(reserved: u32, allow_spot: bool) -> SimulationCluster {
    let carbon = Arc::new(CarbonSeries::new("flat", vec![2.0; 4 * TICKS_PER_HOUR]));
    SimulationCluster::new(carbon, reserved, rates(), allow_spot)
}

#[test]
fn test_holding_cost_on_finalize() {
    let mut ledger = Ledger::new(2, 10, rates());
    ledger.set_max_finish(100);
    let before = ledger.total_dollar_cost();

    let holding = ledger.finalize();
    assert!((holding - 0.8).abs() < 1e-12);
    assert!((ledger.total_dollar_cost() - before - 0.8).abs() < 1e-12);

    // finalize twice never double-charges
    ledger.finalize();
    assert!((ledger.total_dollar_cost() - before - 0.8).abs() < 1e-12);
    assert_eq!(ledger.holding_cost(), Some(holding));
}

#[test]
fn test_second_job_falls_back_to_on_demand() {
    let mut cluster = cluster(4, false);
    let mut first = job(1, 0, 10, 3);
    let mut second = job(2, 0, 10, 3);

    let a = cluster.submit(0, &mut first).unwrap();
    let b = cluster.submit(0, &mut second).unwrap();

    assert_eq!((a.reserved, a.on_demand), (3, 0));
    assert_eq!((b.reserved, b.on_demand), (0, 3));
    assert_eq!(a.dollar_cost, 0.0);
    assert!((b.dollar_cost - 3.0 * 10.0 * 0.01).abs() < 1e-12);
    assert_eq!(first.reserved_grant(), Some(3));
    assert_eq!(second.reserved_grant(), Some(0));
    assert_eq!(cluster.available_reserved(), 1);

    let dispositions: Vec<Disposition> = cluster
        .ledger()
        .records()
        .iter()
        .map(|record| record.disposition)
        .collect();
    assert_eq!(dispositions, vec![Disposition::Reserved, Disposition::OnDemand]);
}

#[test]
fn test_carbon_accrues_for_every_billing_mode() {
    let mut cluster = cluster(1, true);
    cluster.submit(0, &mut job(1, 0, 10, 1)).unwrap(); // spot
    cluster
        .submit(0, &mut job(2, 0, 3 * TICKS_PER_HOUR, 1))
        .unwrap(); // reserved
    cluster
        .submit(0, &mut job(3, 0, 3 * TICKS_PER_HOUR, 2))
        .unwrap(); // on demand

    let expected = 2.0 * (10.0 + 3.0 * TICKS_PER_HOUR as f64 + 2.0 * 3.0 * TICKS_PER_HOUR as f64);
    assert!((cluster.ledger().total_carbon_cost() - expected).abs() < 1e-9);
}

#[test]
fn test_spot_jobs_leave_reserved_pool_untouched() {
    let mut cluster = cluster(2, true);
    let admission = cluster.submit(0, &mut job(1, 0, 100, 2)).unwrap();
    assert!(admission.spot);
    assert_eq!(cluster.available_reserved(), 2);
    assert!((admission.dollar_cost - 2.0 * 100.0 * 0.002).abs() < 1e-12);
    assert!(cluster.ledger().pending_release().is_empty());
}

#[test]
fn test_refresh_releases_at_finish() {
    let mut cluster = cluster(4, false);
    cluster.submit(5, &mut job(1, 0, 10, 4)).unwrap();
    assert_eq!(cluster.available_reserved(), 0);

    assert_eq!(cluster.refresh(14).unwrap(), 0);
    assert_eq!(cluster.available_reserved(), 0);
    assert_eq!(cluster.refresh(15).unwrap(), 4);
    assert_eq!(cluster.available_reserved(), 4);
}

#[test]
fn test_refresh_catches_up_on_skipped_ticks() {
    let mut cluster = cluster(4, false);
    cluster.submit(0, &mut job(1, 0, 3, 1)).unwrap();
    cluster.submit(0, &mut job(2, 0, 5, 2)).unwrap();
    assert_eq!(cluster.refresh(20).unwrap(), 3);
    assert_eq!(cluster.available_reserved(), 4);
}

#[test]
fn test_over_release_is_a_capacity_violation() {
    let mut ledger = Ledger::new(2, 10, rates());
    ledger.schedule_release(3, 1);
    let err = ledger.release_due(3).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::CapacityInvariantViolation {
            available: 3,
            total: 2
        }
    ));
}

#[test]
fn test_audit_record_fields() {
    let mut cluster = cluster(4, false);
    cluster.submit(7, &mut job(9, 2, 10, 2)).unwrap();
    let record = &cluster.ledger().records()[0];
    assert_eq!(record.job_id, JobId(9));
    assert_eq!(record.start, 7);
    assert_eq!(record.waiting, 5);
    assert_eq!(record.finish, 17);
    assert_eq!(record.carbon_cost, 2.0 * 10.0 * 2.0);
    assert_eq!(cluster.ledger().max_finish(), 17);
}

#[test]
fn test_utilization_covers_start_to_finish_inclusive() {
    let mut cluster = cluster(4, false);
    cluster.submit(2, &mut job(1, 0, 3, 2)).unwrap();
    let utilization = cluster.ledger().utilization();
    assert_eq!(&utilization[..7], &[0, 0, 2, 2, 2, 2, 0]);
}

#[test]
fn test_cost_rates_default_to_hourly_prices() {
    let per_tick = CostRates::default().per_tick();
    assert!((per_tick.on_demand * TICKS_PER_HOUR as f64 - 0.0624).abs() < 1e-12);
    assert!((per_tick.spot * TICKS_PER_HOUR as f64 - 0.01248).abs() < 1e-12);
    assert_eq!(per_tick.reserved_discount_rate, 0.4);
}

#[test]
fn test_report_and_sinks() {
    let mut cluster = cluster(2, false);
    cluster.submit(0, &mut job(1, 0, 30, 1)).unwrap();
    cluster.finalize().unwrap();

    let report = RunReport::from_cluster(&cluster, "abc123", "pai", "cost-0-oracle-x-2-1");
    assert_eq!(report.cluster, "simulation");
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.bucketed_utilization.len(), (4 * TICKS_PER_HOUR).div_ceil(60));
    assert!(report.reserved_holding_cost > 0.0);

    let mut memory = InMemorySink::new();
    memory.save(&report).unwrap();
    assert_eq!(memory.reports().len(), 1);

    let root = std::env::temp_dir().join(format!("carbon-sink-{}", report.run_id));
    let mut files = JsonFileSink::new(root.clone());
    files.save(&report).unwrap();
    let dir = files.directory(&report);
    assert_eq!(dir, root.join("simulation").join("pai"));

    let details = std::fs::read_to_string(dir.join("details-cost-0-oracle-x-2-1.json")).unwrap();
    let parsed: RunReport = serde_json::from_str(&details).unwrap();
    assert_eq!(parsed.run_id, report.run_id);
    assert!(dir.join("runtime-cost-0-oracle-x-2-1.json").exists());

    std::fs::remove_dir_all(&root).unwrap();
}
