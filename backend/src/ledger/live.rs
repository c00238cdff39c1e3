//! Live batch-cluster backend
//!
//! Jobs are handed to an external batch scheduler through a [`ClusterClient`].
//! Reserved units are granted partially: a job takes whatever is free and the
//! shortfall runs on demand. Short jobs go to the `{partition}spot` partition
//! when spot is allowed.
//!
//! A background [`Observer`] polls node power and running jobs on a fixed
//! interval and is the source of truth for carbon, cost and idle reserved
//! capacity. It shares the [`LiveCluster`] with the driver through one
//! `parking_lot::Mutex`; each poll-and-update cycle holds the lock.

use super::{Admission, Cluster, Disposition, Ledger, LedgerError, TickRates};
use crate::carbon::CarbonSeries;
use crate::core::time::TIME_FACTOR;
use crate::models::job::{Job, LengthClass, ResourceClass};
use crate::search::compute_consumption;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the external cluster
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterClientError {
    #[error("cluster query timed out after {0:?}")]
    Timeout(Duration),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// A batch job request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    /// `{job_id}-{experiment}`
    pub name: String,
    pub cpus: u32,
    pub script: String,
    pub partition: String,
    pub time_limit_minutes: u64,
}

/// Opaque id assigned by the external scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

/// Accounting record of a finished external job. Times are ticks since the
/// experiment started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub name: String,
    pub submit: usize,
    pub start: usize,
    pub end: usize,
    pub elapsed: usize,
    pub cpus: u32,
    pub state: String,
    pub partition: String,
}

/// Powered-on nodes of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePower {
    pub regular: u32,
    pub spot: u32,
}

/// A job the external scheduler reports as not yet finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningJob {
    pub name: String,
    pub cpus: u32,
}

/// Access to an external batch scheduler.
///
/// Implementations must bound every call with a timeout and report failures
/// as [`ClusterClientError`].
pub trait ClusterClient: Send + Sync {
    fn submit(&self, request: &JobSubmission) -> Result<JobHandle, ClusterClientError>;

    fn completed_jobs(&self, partition: &str) -> Result<Vec<CompletedJob>, ClusterClientError>;

    /// Powered-on nodes for `partition` and its spot sibling.
    fn node_power(&self, partition: &str) -> Result<NodePower, ClusterClientError>;

    fn running_jobs(&self, partition: &str) -> Result<Vec<RunningJob>, ClusterClientError>;
}

/// One observer poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSample {
    pub tick: usize,
    pub power_on: u32,
    pub power_on_spot: u32,
    pub power_on_total: u32,
    pub reserved_idle: i64,
    pub running_jobs: usize,
}

/// A submitted job matched with its accounting record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledJob {
    pub name: String,
    pub arrival: usize,
    pub duration: usize,
    pub cpus: u32,
    pub length_class: LengthClass,
    pub resource_class: ResourceClass,
    /// Carbon over `[start, end)`
    pub run_carbon: f64,
    /// Carbon over `[submit, end)`
    pub total_carbon: f64,
    pub run_dollar_cost: f64,
    pub total_dollar_cost: f64,
    pub submit: usize,
    pub start: usize,
    pub waiting: usize,
    pub finish: usize,
    pub state: String,
}

/// Static settings of a live cluster
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub partition: String,
    pub script: String,
    pub experiment: String,
    pub reserved_instances: u32,
    pub rates: TickRates,
    pub allow_spot: bool,
    /// Wall-clock length of one tick
    pub tick_period: Duration,
}

/// Cluster backed by an external batch scheduler
pub struct LiveCluster {
    ledger: Ledger,
    carbon: Arc<CarbonSeries>,
    client: Arc<dyn ClusterClient>,
    settings: LiveSettings,
    submitted: HashMap<String, Job>,
    running_jobs: Option<usize>,
    monitor_tick: usize,
    monitor_carbon: f64,
    monitor_dollar: f64,
    samples: Vec<MonitorSample>,
    reconciled: Vec<ReconciledJob>,
    started: Instant,
    last_pacing: Instant,
}

impl LiveCluster {
    pub fn new(
        carbon: Arc<CarbonSeries>,
        client: Arc<dyn ClusterClient>,
        settings: LiveSettings,
    ) -> Self {
        let now = Instant::now();
        Self {
            ledger: Ledger::new(settings.reserved_instances, carbon.len(), settings.rates),
            carbon,
            client,
            settings,
            submitted: HashMap::new(),
            running_jobs: None,
            monitor_tick: 0,
            monitor_carbon: 0.0,
            monitor_dollar: 0.0,
            samples: Vec::new(),
            reconciled: Vec::new(),
            started: now,
            last_pacing: now,
        }
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    /// Running jobs at the last successful poll, `None` before the first.
    pub fn running_jobs(&self) -> Option<usize> {
        self.running_jobs
    }

    /// Carbon and dollar totals measured by the observer.
    pub fn monitor_totals(&self) -> (f64, f64) {
        (self.monitor_carbon, self.monitor_dollar)
    }

    fn job_name(&self, job: &Job) -> String {
        format!("{}-{}", job.id(), self.settings.experiment)
    }

    fn spot_partition(&self) -> String {
        format!("{}spot", self.settings.partition)
    }

    /// One poll-and-update cycle covering `interval_ticks` ticks.
    ///
    /// The monitor clock advances even when the poll fails, so a failed cycle
    /// leaves a gap in the measured totals rather than shifting later ones.
    pub fn poll(&mut self, interval_ticks: usize) -> Result<MonitorSample, ClusterClientError> {
        let tick = self.monitor_tick;
        self.monitor_tick += interval_ticks;

        let power = self.client.node_power(&self.settings.partition)?;
        let running = self.client.running_jobs(&self.settings.partition)?;

        let granted: i64 = running
            .iter()
            .filter_map(|job| self.submitted.get(&job.name))
            .map(|job| i64::from(job.reserved_grant().unwrap_or(0)))
            .sum();
        let reserved_idle = i64::from(self.ledger.total_reserved()) - granted;

        let rates = *self.ledger.rates();
        let interval = interval_ticks as f64;
        let window_carbon = self.carbon.sum(tick, interval_ticks);
        let billable = (i64::from(power.regular) - reserved_idle).max(0) as f64;
        self.monitor_carbon += f64::from(power.regular + power.spot) * window_carbon;
        self.monitor_dollar += billable * interval * rates.on_demand
            + f64::from(power.spot) * interval * rates.spot;

        self.running_jobs = Some(running.len());
        self.ledger.observe_available_reserved(reserved_idle);

        let sample = MonitorSample {
            tick,
            power_on: power.regular,
            power_on_spot: power.spot,
            power_on_total: power.regular + power.spot,
            reserved_idle,
            running_jobs: running.len(),
        };
        debug!(
            tick,
            power_on = sample.power_on,
            power_on_spot = sample.power_on_spot,
            reserved_idle,
            running_jobs = sample.running_jobs,
            "cluster polled"
        );
        self.samples.push(sample.clone());
        Ok(sample)
    }

    /// Match finished external jobs with what was submitted and cost them
    /// from their measured submit/start/end ticks.
    pub fn reconcile(&mut self, completed: &[CompletedJob]) -> &[ReconciledJob] {
        let rates = *self.ledger.rates();
        for record in completed {
            let Some(job) = self.submitted.get(&record.name) else {
                continue;
            };
            let cpus = f64::from(record.cpus);
            let run_carbon =
                self.carbon.sum(record.start, record.end.saturating_sub(record.start)) * cpus;
            let total_carbon =
                self.carbon.sum(record.submit, record.end.saturating_sub(record.submit)) * cpus;
            let span = record.end.saturating_sub(record.submit) as f64;
            let elapsed = record.elapsed as f64;
            let (rate, billed_cpus) = if record.partition.contains("spot") {
                (rates.spot, cpus)
            } else {
                let reserved = f64::from(job.reserved_grant().unwrap_or(0));
                (rates.on_demand, (cpus - reserved).max(0.0))
            };

            self.ledger.set_max_finish(record.end);
            self.reconciled.push(ReconciledJob {
                name: record.name.clone(),
                arrival: job.arrival_tick(),
                duration: job.duration(),
                cpus: record.cpus,
                length_class: job.length_class(),
                resource_class: job.resource_class(),
                run_carbon,
                total_carbon,
                run_dollar_cost: elapsed * rate * billed_cpus,
                total_dollar_cost: span * rate * billed_cpus,
                submit: record.submit,
                start: record.start,
                waiting: record.submit.saturating_sub(job.arrival_tick()),
                finish: record.end,
                state: record.state.clone(),
            });
        }
        &self.reconciled
    }
}

impl Cluster for LiveCluster {
    fn submit(&mut self, tick: usize, job: &mut Job) -> Result<Admission, LedgerError> {
        let window = self.carbon.window(tick, job.planning_horizon() + 1);
        let carbon_cost = compute_consumption(job, 0, &window)?.carbon_cost;
        let cpus = job.cpus();
        let ticks = job.duration() as f64;
        let rates = *self.ledger.rates();

        let spot = self.settings.allow_spot && job.length_class().is_shortest();
        let (partition, reserved, on_demand, dollar_cost, disposition) = if spot {
            let cost = f64::from(cpus) * ticks * rates.spot;
            (self.spot_partition(), 0, 0, cost, Disposition::Spot)
        } else {
            let reserved = self.ledger.grant_partial(cpus);
            let on_demand = cpus - reserved;
            let disposition = match (reserved, on_demand) {
                (_, 0) => Disposition::Reserved,
                (0, _) => Disposition::OnDemand,
                _ => Disposition::Mixed,
            };
            let cost = f64::from(on_demand) * ticks * rates.on_demand;
            (
                self.settings.partition.clone(),
                reserved,
                on_demand,
                cost,
                disposition,
            )
        };
        job.set_reserved_grant(reserved);

        let name = self.job_name(job);
        let seconds = job.duration() * TIME_FACTOR;
        let request = JobSubmission {
            name: name.clone(),
            cpus,
            script: self.settings.script.clone(),
            partition,
            time_limit_minutes: (seconds as f64 / 60.0).round().max(1.0) as u64,
        };
        let handle = self.client.submit(&request)?;
        info!(
            tick,
            job = %name,
            handle = handle.0,
            cpus,
            reserved,
            partition = %request.partition,
            "job submitted to cluster"
        );

        self.ledger.accrue(carbon_cost, dollar_cost);
        self.ledger
            .record(tick, job, carbon_cost, dollar_cost, disposition);
        self.submitted.insert(name, job.clone());

        Ok(Admission {
            reserved,
            on_demand,
            spot,
            carbon_cost,
            dollar_cost,
        })
    }

    /// Reservations come back through the observer, not a release map.
    fn refresh(&mut self, _tick: usize) -> Result<u32, LedgerError> {
        Ok(0)
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn allows_spot(&self) -> bool {
        self.settings.allow_spot
    }

    fn done(&self) -> bool {
        self.running_jobs == Some(0)
    }

    fn pacing_delay(&mut self) -> Duration {
        let now = Instant::now();
        let delay = (self.last_pacing + self.settings.tick_period).saturating_duration_since(now);
        self.last_pacing = now + delay;
        delay
    }

    fn clock(&self, iteration: usize) -> usize {
        let period = self.settings.tick_period.as_secs_f64();
        if period <= 0.0 {
            return iteration;
        }
        let elapsed = (self.started.elapsed().as_secs_f64() / period).round() as usize;
        iteration.max(elapsed)
    }

    fn finalize(&mut self) -> Result<f64, LedgerError> {
        let completed = self.client.completed_jobs(&self.settings.partition)?;
        self.reconcile(&completed);
        self.ledger
            .replace_totals(self.monitor_carbon, self.monitor_dollar);
        let holding = self.ledger.finalize();
        info!(
            reconciled = self.reconciled.len(),
            carbon = self.ledger.total_carbon_cost(),
            dollars = self.ledger.total_dollar_cost(),
            "live cluster finalized"
        );
        Ok(holding)
    }

    fn monitor_samples(&self) -> &[MonitorSample] {
        &self.samples
    }

    fn reconciled_jobs(&self) -> &[ReconciledJob] {
        &self.reconciled
    }

    fn kind(&self) -> &'static str {
        "live"
    }
}

/// Background poller of a [`LiveCluster`]
///
/// Dropping the observer signals it to stop without waiting; call
/// [`Observer::stop`] to join the thread.
pub struct Observer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Observer {
    /// Poll every `period` of wall-clock time, accounting `interval_ticks`
    /// ticks per poll.
    pub fn spawn(
        cluster: Arc<Mutex<LiveCluster>>,
        interval_ticks: usize,
        period: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("cluster-observer".to_string())
            .spawn(move || {
                info!(interval_ticks, "observer started");
                loop {
                    {
                        let mut cluster = cluster.lock();
                        if let Err(err) = cluster.poll(interval_ticks) {
                            warn!(error = %err, "cluster poll failed, skipping cycle");
                        }
                    }
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("observer stopped");
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit. Must not be called while
    /// holding the cluster lock.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("observer thread panicked");
            }
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        // dropping the sender disconnects the channel and ends the loop
        self.stop.take();
    }
}
