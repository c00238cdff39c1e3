//! Resource ledger
//!
//! The mutable accounting state of a cluster: the reserved pool, cumulative
//! carbon and monetary cost, the per-tick CPU utilization histogram, pending
//! reservation releases and the per-job audit log.
//!
//! [`Ledger`] is the shared bookkeeping core. A [`Cluster`] implementation
//! (pure simulation or a live batch cluster) decides how a submitted job is
//! billed and drives the ledger through `submit` / `refresh` / `finalize`.
//!
//! # Capacity invariant
//!
//! `available_reserved <= total_reserved` is checked on every refresh; a
//! violation is a bookkeeping defect and halts the run.

pub mod live;
pub mod simulation;

use crate::core::time::TICKS_PER_HOUR;
use crate::models::job::{Job, JobId, LengthClass, ResourceClass};
use crate::search::SearchError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub use live::{
    ClusterClient, ClusterClientError, CompletedJob, JobHandle, JobSubmission, LiveCluster,
    LiveSettings, MonitorSample, NodePower, Observer, ReconciledJob, RunningJob,
};
pub use simulation::SimulationCluster;

/// Ticks averaged together in the bucketed utilization report.
pub const UTILIZATION_BUCKET_TICKS: usize = 60;

/// Ledger and cluster errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("available reserved capacity {available} outside [0, {total}]")]
    CapacityInvariantViolation { available: i64, total: u32 },

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("cluster client error: {0}")]
    Client(#[from] ClusterClientError),

    #[error("result sink error: {0}")]
    Sink(#[from] std::io::Error),

    #[error("result serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hourly instance prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    /// On-demand price per CPU-hour
    pub on_demand_per_hour: f64,
    /// Spot price per CPU-hour
    pub spot_per_hour: f64,
    /// Fraction of the on-demand price paid for each reserved unit
    pub reserved_discount_rate: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            on_demand_per_hour: 0.0624,
            spot_per_hour: 0.01248,
            reserved_discount_rate: 0.4,
        }
    }
}

impl CostRates {
    /// Spread the hourly prices over the ticks of one hour.
    pub fn per_tick(&self) -> TickRates {
        TickRates {
            on_demand: self.on_demand_per_hour / TICKS_PER_HOUR as f64,
            spot: self.spot_per_hour / TICKS_PER_HOUR as f64,
            reserved_discount_rate: self.reserved_discount_rate,
        }
    }
}

/// Prices per CPU-tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRates {
    pub on_demand: f64,
    pub spot: f64,
    pub reserved_discount_rate: f64,
}

/// How a job's capacity was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Fully covered by reserved units
    Reserved,
    /// Partly reserved, shortfall on demand
    Mixed,
    OnDemand,
    Spot,
}

/// Outcome of submitting one job to a cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub reserved: u32,
    pub on_demand: u32,
    pub spot: bool,
    pub carbon_cost: f64,
    pub dollar_cost: f64,
}

/// One row of the per-job audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub arrival: usize,
    pub duration: usize,
    pub cpus: u32,
    pub length_class: LengthClass,
    pub resource_class: ResourceClass,
    pub carbon_cost: f64,
    pub dollar_cost: f64,
    pub start: usize,
    pub waiting: usize,
    pub finish: usize,
    pub disposition: Disposition,
}

/// Shared accounting core of every cluster
#[derive(Debug, Clone)]
pub struct Ledger {
    rates: TickRates,
    total_reserved: u32,
    available_reserved: u32,
    total_carbon_cost: f64,
    total_dollar_cost: f64,
    utilization: Vec<u32>,
    pending_release: BTreeMap<usize, u32>,
    records: Vec<JobRecord>,
    max_finish: usize,
    holding_cost: Option<f64>,
}

impl Ledger {
    /// Create a ledger with `total_reserved` units and a utilization histogram
    /// covering `horizon` ticks.
    ///
    /// # Example
    /// ```
    /// use carbon_scheduler_core_rs::ledger::{CostRates, Ledger};
    ///
    /// let ledger = Ledger::new(4, 100, CostRates::default().per_tick());
    /// assert_eq!(ledger.available_reserved(), 4);
    /// assert_eq!(ledger.utilization().len(), 100);
    /// ```
    pub fn new(total_reserved: u32, horizon: usize, rates: TickRates) -> Self {
        Self {
            rates,
            total_reserved,
            available_reserved: total_reserved,
            total_carbon_cost: 0.0,
            total_dollar_cost: 0.0,
            utilization: vec![0; horizon],
            pending_release: BTreeMap::new(),
            records: Vec::new(),
            max_finish: 0,
            holding_cost: None,
        }
    }

    pub fn rates(&self) -> &TickRates {
        &self.rates
    }

    pub fn total_reserved(&self) -> u32 {
        self.total_reserved
    }

    pub fn available_reserved(&self) -> u32 {
        self.available_reserved
    }

    pub fn total_carbon_cost(&self) -> f64 {
        self.total_carbon_cost
    }

    pub fn total_dollar_cost(&self) -> f64 {
        self.total_dollar_cost
    }

    /// CPUs in use per tick.
    pub fn utilization(&self) -> &[u32] {
        &self.utilization
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    /// Largest finish tick recorded so far.
    pub fn max_finish(&self) -> usize {
        self.max_finish
    }

    /// Reserved units waiting to be released, keyed by release tick.
    pub fn pending_release(&self) -> &BTreeMap<usize, u32> {
        &self.pending_release
    }

    /// Holding cost added by [`Ledger::finalize`], once finalized.
    pub fn holding_cost(&self) -> Option<f64> {
        self.holding_cost
    }

    /// Grant `units` reserved units if the pool can cover all of them.
    pub fn try_grant(&mut self, units: u32) -> bool {
        if self.available_reserved >= units {
            self.available_reserved -= units;
            true
        } else {
            false
        }
    }

    /// Grant as many of `units` as the pool holds and return the grant.
    pub fn grant_partial(&mut self, units: u32) -> u32 {
        let granted = units.min(self.available_reserved);
        self.available_reserved -= granted;
        granted
    }

    /// Return `units` to the pool when `tick` is refreshed.
    pub fn schedule_release(&mut self, tick: usize, units: u32) {
        *self.pending_release.entry(tick).or_insert(0) += units;
    }

    /// Release every reservation due at or before `tick` and check the
    /// capacity invariant. Returns the released units.
    ///
    /// Ticks advance one at a time in simulation, so this releases exactly
    /// the reservations scheduled for `tick`; a clock that skips ticks still
    /// gets its earlier releases back.
    pub fn release_due(&mut self, tick: usize) -> Result<u32, LedgerError> {
        let later = self.pending_release.split_off(&(tick + 1));
        let due = std::mem::replace(&mut self.pending_release, later);
        let released: u64 = due.values().map(|&units| u64::from(units)).sum();

        let available = u64::from(self.available_reserved) + released;
        if available > u64::from(self.total_reserved) {
            error!(
                tick,
                available,
                total = self.total_reserved,
                "reserved capacity exceeded its total"
            );
            return Err(LedgerError::CapacityInvariantViolation {
                available: available as i64,
                total: self.total_reserved,
            });
        }
        self.available_reserved = available as u32;
        Ok(released as u32)
    }

    /// Overwrite the available pool with an observed value, clamped into
    /// `[0, total_reserved]`.
    pub fn observe_available_reserved(&mut self, observed: i64) {
        let clamped = observed.clamp(0, i64::from(self.total_reserved));
        if clamped != observed {
            warn!(
                observed,
                total = self.total_reserved,
                "observed idle reserved capacity out of range, clamping"
            );
        }
        self.available_reserved = clamped as u32;
    }

    /// Add to the running totals.
    pub fn accrue(&mut self, carbon_cost: f64, dollar_cost: f64) {
        self.total_carbon_cost += carbon_cost;
        self.total_dollar_cost += dollar_cost;
    }

    /// Replace the running totals (live clusters report measured totals).
    pub fn replace_totals(&mut self, carbon_cost: f64, dollar_cost: f64) {
        self.total_carbon_cost = carbon_cost;
        self.total_dollar_cost = dollar_cost;
    }

    /// Append an audit record for `job` started at `start` and add its CPUs
    /// to the utilization histogram over `[start, finish]`. Ticks past the
    /// histogram horizon are dropped.
    pub fn record(
        &mut self,
        start: usize,
        job: &Job,
        carbon_cost: f64,
        dollar_cost: f64,
        disposition: Disposition,
    ) {
        let finish = start + job.duration();
        self.max_finish = self.max_finish.max(finish);

        let last = finish.min(self.utilization.len().saturating_sub(1));
        if start < self.utilization.len() {
            for slot in &mut self.utilization[start..=last] {
                *slot += job.cpus();
            }
        }

        self.records.push(JobRecord {
            job_id: job.id(),
            arrival: job.arrival_tick(),
            duration: job.duration(),
            cpus: job.cpus(),
            length_class: job.length_class(),
            resource_class: job.resource_class(),
            carbon_cost,
            dollar_cost,
            start,
            waiting: start.saturating_sub(job.arrival_tick()),
            finish,
            disposition,
        });
    }

    /// Reserved-instance holding cost for the run so far:
    /// `total_reserved * discount * max_finish * on_demand`.
    pub fn reserved_holding_cost(&self) -> f64 {
        f64::from(self.total_reserved)
            * self.rates.reserved_discount_rate
            * self.max_finish as f64
            * self.rates.on_demand
    }

    /// Add the reserved holding cost to the monetary total. Only the first
    /// call adds anything; later calls return the same amount.
    ///
    /// ```
    /// use carbon_scheduler_core_rs::ledger::{Ledger, TickRates};
    ///
    /// let rates = TickRates { on_demand: 0.01, spot: 0.0, reserved_discount_rate: 0.4 };
    /// let mut ledger = Ledger::new(2, 10, rates);
    /// ledger.set_max_finish(100);
    /// let holding = ledger.finalize();
    /// assert!((holding - 0.8).abs() < 1e-12);
    /// assert!((ledger.total_dollar_cost() - 0.8).abs() < 1e-12);
    /// ```
    pub fn finalize(&mut self) -> f64 {
        if let Some(cost) = self.holding_cost {
            return cost;
        }
        let cost = self.reserved_holding_cost();
        self.total_dollar_cost += cost;
        self.holding_cost = Some(cost);
        cost
    }

    /// Raise the recorded maximum finish tick (used when finish ticks come
    /// from outside the audit log).
    pub fn set_max_finish(&mut self, tick: usize) {
        self.max_finish = self.max_finish.max(tick);
    }

    /// Mean utilization per bucket of [`UTILIZATION_BUCKET_TICKS`] ticks.
    pub fn bucketed_utilization(&self) -> Vec<f64> {
        self.utilization
            .chunks(UTILIZATION_BUCKET_TICKS)
            .map(|bucket| {
                bucket.iter().map(|&cpus| f64::from(cpus)).sum::<f64>() / bucket.len() as f64
            })
            .collect()
    }
}

/// A cluster the schedulers submit jobs to
///
/// Every method is called with exclusive access; the driver holds the
/// cluster lock for a whole execute + refresh cycle.
pub trait Cluster: Send {
    /// Submit `job` now. Records the reserved grant on the job.
    fn submit(&mut self, tick: usize, job: &mut Job) -> Result<Admission, LedgerError>;

    /// Release reservations due at `tick` and check the capacity invariant.
    /// Returns the released units.
    fn refresh(&mut self, tick: usize) -> Result<u32, LedgerError>;

    fn ledger(&self) -> &Ledger;

    fn available_reserved(&self) -> u32 {
        self.ledger().available_reserved()
    }

    /// Whether short jobs go to spot capacity.
    fn allows_spot(&self) -> bool;

    /// True once the cluster has no outstanding work.
    fn done(&self) -> bool {
        true
    }

    /// How long the driver should sleep after this tick; zero in simulation.
    fn pacing_delay(&mut self) -> Duration {
        Duration::ZERO
    }

    /// Tick to use for loop iteration `iteration`.
    fn clock(&self, iteration: usize) -> usize {
        iteration
    }

    /// Close the books and return the reserved holding cost.
    fn finalize(&mut self) -> Result<f64, LedgerError>;

    /// Samples collected by a background observer, if any.
    fn monitor_samples(&self) -> &[MonitorSample] {
        &[]
    }

    /// Per-job results reconciled against the external cluster, if any.
    fn reconciled_jobs(&self) -> &[ReconciledJob] {
        &[]
    }

    /// Short label for result paths ("simulation", "live").
    fn kind(&self) -> &'static str;
}

/// Everything a finished run produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub experiment: String,
    /// Cluster kind, used to group results
    pub cluster: String,
    pub task_trace: String,
    /// `{policy}-{start}-{carbon_policy}-{carbon_trace}-{reserved}-{waiting}`
    pub label: String,
    pub records: Vec<JobRecord>,
    pub utilization: Vec<u32>,
    pub bucketed_utilization: Vec<f64>,
    pub total_carbon_cost: f64,
    pub total_dollar_cost: f64,
    pub reserved_holding_cost: f64,
    pub monitor: Vec<MonitorSample>,
    pub reconciled: Vec<ReconciledJob>,
}

impl RunReport {
    /// Snapshot a finalized cluster.
    pub fn from_cluster(
        cluster: &dyn Cluster,
        experiment: &str,
        task_trace: &str,
        label: &str,
    ) -> Self {
        let ledger = cluster.ledger();
        Self {
            run_id: Uuid::new_v4(),
            experiment: experiment.to_string(),
            cluster: cluster.kind().to_string(),
            task_trace: task_trace.to_string(),
            label: label.to_string(),
            records: ledger.records().to_vec(),
            utilization: ledger.utilization().to_vec(),
            bucketed_utilization: ledger.bucketed_utilization(),
            total_carbon_cost: ledger.total_carbon_cost(),
            total_dollar_cost: ledger.total_dollar_cost(),
            reserved_holding_cost: ledger.holding_cost().unwrap_or(0.0),
            monitor: cluster.monitor_samples().to_vec(),
            reconciled: cluster.reconciled_jobs().to_vec(),
        }
    }
}

/// Destination for run results
pub trait ResultSink: Send {
    fn save(&mut self, report: &RunReport) -> Result<(), LedgerError>;
}

/// Keeps reports in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySink {
    reports: Vec<RunReport>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[RunReport] {
        &self.reports
    }
}

impl ResultSink for InMemorySink {
    fn save(&mut self, report: &RunReport) -> Result<(), LedgerError> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Writes `details-{label}.json` and `runtime-{label}.json` under
/// `{root}/{cluster}/{task_trace}/`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    root: PathBuf,
}

#[derive(Serialize)]
struct RuntimeRow {
    time: usize,
    cpus: f64,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory a report is written to.
    pub fn directory(&self, report: &RunReport) -> PathBuf {
        self.root.join(&report.cluster).join(&report.task_trace)
    }
}

impl ResultSink for JsonFileSink {
    fn save(&mut self, report: &RunReport) -> Result<(), LedgerError> {
        let dir = self.directory(report);
        fs::create_dir_all(&dir)?;

        let details = serde_json::to_vec_pretty(report)?;
        fs::write(dir.join(format!("details-{}.json", report.label)), details)?;

        let runtime: Vec<RuntimeRow> = report
            .bucketed_utilization
            .iter()
            .enumerate()
            .map(|(time, &cpus)| RuntimeRow { time, cpus })
            .collect();
        let runtime = serde_json::to_vec_pretty(&runtime)?;
        fs::write(dir.join(format!("runtime-{}.json", report.label)), runtime)?;
        Ok(())
    }
}
