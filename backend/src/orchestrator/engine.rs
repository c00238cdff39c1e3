//! Orchestrator engine - the simulation driver
//!
//! # Tick Loop
//!
//! ```text
//! for each loop iteration i:
//!   1. tick = cluster.clock(i)          (i in simulation, wall-clock aware live)
//!   2. submit every arrival with arrival <= tick to the scheduler
//!      (zero-duration jobs are dropped)
//!   3. lock cluster: scheduler.execute(tick) then refresh(tick)
//!   4. sleep cluster.pacing_delay()     (outside the lock, zero in simulation)
//!   5. stop once arrivals, the pending queue and the cluster are all idle
//! ```
//!
//! The cluster sits behind one `parking_lot::Mutex` shared with the live
//! observer thread, so a driver cycle and an observer poll never interleave.
//!
//! # Failure model
//!
//! - A job whose start time cannot be searched is rejected and logged; the
//!   run continues.
//! - A capacity invariant violation or cluster error aborts the run with
//!   `Err`.

use crate::carbon::CarbonSeries;
use crate::core::time::TickClock;
use crate::ledger::{
    Cluster, ClusterClient, CostRates, LedgerError, LiveCluster, LiveSettings, Observer,
    ResultSink, RunReport, SimulationCluster,
};
use crate::models::event::{Event, EventLog};
use crate::models::job::{ConfigError, QueueConfig, TraceJob};
use crate::policy::{create_scheduler, Scheduler, SchedulingPolicy};
use crate::search::{CarbonPolicy, SearchError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// How queue average durations are obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageMode {
    /// Averages over the whole arrival trace, fixed before the run
    #[default]
    Trace,
    /// Running averages over the jobs that have arrived so far
    Running,
}

fn default_tick_millis() -> u64 {
    1000
}

/// Which cluster backend jobs are submitted to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterMode {
    #[default]
    Simulation,
    Live {
        partition: String,
        script: String,
        poll_interval_ticks: usize,
        /// Wall-clock milliseconds per tick
        #[serde(default = "default_tick_millis")]
        tick_millis: u64,
    },
}

impl ClusterMode {
    /// Partition name used in the experiment key.
    pub fn partition(&self) -> &str {
        match self {
            ClusterMode::Simulation => "simulation",
            ClusterMode::Live { partition, .. } => partition,
        }
    }
}

/// Complete run configuration
///
/// # Example
/// ```
/// use carbon_scheduler_core_rs::orchestrator::SimulationConfig;
///
/// let config = SimulationConfig::from_json_str(
///     r#"{"scheduling_policy": "carbon-cost", "carbon_policy": "cst_average",
///         "reserved_instances": 4, "waiting_times": "6x24"}"#,
/// )
/// .unwrap();
/// assert_eq!(config.reserved_instances, 4);
/// assert_eq!(config.experiment_name().len(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Scheduling policy tag, e.g. `"carbon-cost"`
    pub scheduling_policy: String,
    /// Carbon policy tag, e.g. `"oracle"`
    pub carbon_policy: String,
    pub reserved_instances: u32,
    /// Waiting time per queue in hours, `x`-separated
    pub waiting_times: String,
    pub rates: CostRates,
    pub carbon_trace: String,
    pub task_trace: String,
    pub carbon_start_index: usize,
    pub averages: AverageMode,
    pub cluster: ClusterMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scheduling_policy: "cost".to_string(),
            carbon_policy: "oracle".to_string(),
            reserved_instances: 9,
            waiting_times: "1000x1000".to_string(),
            rates: CostRates::default(),
            carbon_trace: "AU-SA".to_string(),
            task_trace: "pai_new_trace".to_string(),
            carbon_start_index: 7000,
            averages: AverageMode::Trace,
            cluster: ClusterMode::Simulation,
        }
    }
}

impl SimulationConfig {
    /// Parse JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policies()?;
        self.queues()?;

        let CostRates {
            on_demand_per_hour,
            spot_per_hour,
            reserved_discount_rate,
        } = self.rates;
        for (name, value) in [
            ("on_demand_per_hour", on_demand_per_hour),
            ("spot_per_hour", spot_per_hour),
            ("reserved_discount_rate", reserved_discount_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if let ClusterMode::Live {
            partition,
            poll_interval_ticks,
            tick_millis,
            ..
        } = &self.cluster
        {
            if partition.is_empty() {
                return Err(ConfigError::Invalid(
                    "live cluster partition must not be empty".to_string(),
                ));
            }
            if *poll_interval_ticks == 0 || *tick_millis == 0 {
                return Err(ConfigError::Invalid(
                    "poll_interval_ticks and tick_millis must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Parsed scheduling and carbon policies.
    pub fn policies(&self) -> Result<(SchedulingPolicy, CarbonPolicy), ConfigError> {
        Ok((
            self.scheduling_policy.parse()?,
            self.carbon_policy.parse()?,
        ))
    }

    /// Queue configuration from `waiting_times`.
    pub fn queues(&self) -> Result<QueueConfig, ConfigError> {
        QueueConfig::parse_waiting_times(&self.waiting_times)
    }

    /// First 10 hex digits of the SHA-256 of the run key; tags external jobs.
    pub fn experiment_name(&self) -> String {
        let key = format!(
            "{}-{}-{}-{}-{}-{}-{}-{}",
            self.carbon_trace,
            self.carbon_start_index,
            self.scheduling_policy,
            self.carbon_policy,
            self.waiting_times,
            self.reserved_instances,
            self.task_trace,
            self.cluster.partition()
        );
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..10].to_string()
    }

    /// File label of the run's results.
    pub fn result_label(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            self.scheduling_policy,
            self.carbon_start_index,
            self.carbon_policy,
            self.carbon_trace,
            self.reserved_instances,
            self.waiting_times
        )
    }
}

// ============================================================================
// Results and errors
// ============================================================================

/// Result of a single tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    /// Tick number
    pub tick: usize,
    /// Jobs handed to the scheduler this tick
    pub num_arrivals: usize,
    /// Jobs rejected because no start time could be found
    pub num_rejected: usize,
    /// Entries still queued after execute
    pub pending: usize,
}

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub carbon_cost: f64,
    pub dollar_cost: f64,
    /// Loop iterations executed
    pub ticks: usize,
    /// Jobs accepted by the scheduler
    pub jobs: usize,
    pub rejected: usize,
}

/// Simulation error types
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to start cluster observer: {0}")]
    Observer(#[from] std::io::Error),
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Simulation driver
///
/// Owns the arrival backlog, the scheduler and the shared cluster, and
/// advances them tick by tick.
pub struct Orchestrator {
    config: SimulationConfig,
    experiment: String,
    queues: QueueConfig,
    arrivals: VecDeque<TraceJob>,
    scheduler: Box<dyn Scheduler>,
    cluster: Arc<Mutex<dyn Cluster>>,
    observer: Option<Observer>,
    horizon: usize,
    clock: TickClock,
    iteration: usize,
    event_log: EventLog,
    jobs: usize,
    rejected: usize,
    finished: bool,
}

impl Orchestrator {
    /// Create a simulation-mode orchestrator.
    ///
    /// # Example
    ///
    /// ```rust
    /// use carbon_scheduler_core_rs::models::job::TraceJob;
    /// use carbon_scheduler_core_rs::orchestrator::{Orchestrator, SimulationConfig};
    /// use carbon_scheduler_core_rs::CarbonSeries;
    ///
    /// let config = SimulationConfig {
    ///     scheduling_policy: "cost".to_string(),
    ///     reserved_instances: 2,
    ///     waiting_times: "0".to_string(),
    ///     ..SimulationConfig::default()
    /// };
    /// let carbon = CarbonSeries::new("flat", vec![1.0; 100]);
    /// let trace = vec![TraceJob::new(1, 0, 10, 2)];
    ///
    /// let mut orchestrator = Orchestrator::new(config, carbon, trace).unwrap();
    /// let summary = orchestrator.run().unwrap();
    /// assert_eq!(summary.jobs, 1);
    /// assert_eq!(summary.carbon_cost, 20.0);
    /// ```
    pub fn new(
        config: SimulationConfig,
        carbon: CarbonSeries,
        trace: Vec<TraceJob>,
    ) -> Result<Self, SimulationError> {
        if matches!(config.cluster, ClusterMode::Live { .. }) {
            return Err(ConfigError::Invalid(
                "a live cluster needs a client, use Orchestrator::with_client".to_string(),
            )
            .into());
        }
        let carbon = Arc::new(carbon);
        let cluster = SimulationCluster::new(
            carbon.clone(),
            config.reserved_instances,
            config.rates.per_tick(),
            Self::spot_allowed(&config)?,
        );
        Self::assemble(config, carbon, trace, Arc::new(Mutex::new(cluster)), None)
    }

    /// Create an orchestrator driving a live cluster through `client`. Spawns
    /// the observer thread.
    pub fn with_client(
        config: SimulationConfig,
        carbon: CarbonSeries,
        trace: Vec<TraceJob>,
        client: Arc<dyn ClusterClient>,
    ) -> Result<Self, SimulationError> {
        let ClusterMode::Live {
            partition,
            script,
            poll_interval_ticks,
            tick_millis,
        } = config.cluster.clone()
        else {
            return Err(ConfigError::Invalid(
                "with_client requires a live cluster configuration".to_string(),
            )
            .into());
        };
        config.validate()?;

        let carbon = Arc::new(carbon);
        let tick_period = Duration::from_millis(tick_millis);
        let settings = LiveSettings {
            partition,
            script,
            experiment: config.experiment_name(),
            reserved_instances: config.reserved_instances,
            rates: config.rates.per_tick(),
            allow_spot: Self::spot_allowed(&config)?,
            tick_period,
        };
        let live = Arc::new(Mutex::new(LiveCluster::new(carbon.clone(), client, settings)));
        let period = tick_period.saturating_mul(poll_interval_ticks as u32);
        let observer = Observer::spawn(live.clone(), poll_interval_ticks, period)?;
        Self::assemble(config, carbon, trace, live, Some(observer))
    }

    fn spot_allowed(config: &SimulationConfig) -> Result<bool, ConfigError> {
        Ok(config.policies()?.0.spot_aware())
    }

    fn assemble(
        config: SimulationConfig,
        carbon: Arc<CarbonSeries>,
        mut trace: Vec<TraceJob>,
        cluster: Arc<Mutex<dyn Cluster>>,
        observer: Option<Observer>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let (policy, carbon_policy) = config.policies()?;

        trace.sort_by_key(|job| job.arrival);
        let mut queues = config.queues()?;
        if config.averages == AverageMode::Trace {
            let durations: Vec<usize> = trace.iter().map(|job| job.duration).collect();
            queues = queues.with_trace_averages(&durations);
        }

        let scheduler = create_scheduler(policy, carbon_policy, carbon.clone(), queues.clone());
        let experiment = config.experiment_name();
        info!(
            experiment = %experiment,
            policy = %policy,
            carbon_policy = %carbon_policy,
            reserved = config.reserved_instances,
            jobs = trace.len(),
            horizon = carbon.len(),
            "simulation initialized"
        );

        Ok(Self {
            experiment,
            queues,
            arrivals: trace.into(),
            scheduler,
            cluster,
            observer,
            horizon: carbon.len(),
            clock: TickClock::default(),
            iteration: 0,
            event_log: EventLog::new(),
            jobs: 0,
            rejected: 0,
            finished: false,
            config,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get current tick number
    pub fn current_tick(&self) -> usize {
        self.clock.current_tick()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn queues(&self) -> &QueueConfig {
        &self.queues
    }

    /// Get event log
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Run `f` with exclusive access to the cluster.
    pub fn with_cluster<R>(&self, f: impl FnOnce(&dyn Cluster) -> R) -> R {
        let cluster = self.cluster.lock();
        f(&*cluster)
    }

    /// True once no arrivals remain, nothing is queued and the cluster is idle.
    pub fn is_done(&self) -> bool {
        self.arrivals.is_empty() && self.scheduler.pending() == 0 && self.cluster.lock().done()
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    /// Execute one loop iteration.
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        let tick = self.cluster.lock().clock(self.iteration);
        self.clock.advance_to(tick);

        let mut num_arrivals = 0;
        let mut num_rejected = 0;
        while self
            .arrivals
            .front()
            .is_some_and(|next| next.arrival <= tick)
        {
            let Some(next) = self.arrivals.pop_front() else {
                break;
            };
            if next.duration == 0 {
                debug!(tick, job_id = %next.id, "dropping zero-duration job");
                continue;
            }
            let job = next.classify(&self.queues);
            if self.config.averages == AverageMode::Running {
                self.queues.observe(next.duration);
            }

            self.event_log.log(Event::Arrival {
                tick,
                job_id: job.id(),
                duration: job.duration(),
                cpus: job.cpus(),
                waiting_budget: job.waiting_budget(),
            });
            let job_id = job.id();
            match self.scheduler.submit(tick, job, &mut self.event_log) {
                Ok(()) => {
                    num_arrivals += 1;
                    self.jobs += 1;
                }
                Err(err) => {
                    warn!(tick, job_id = %job_id, error = %err, "job rejected");
                    self.event_log.log(Event::Rejected {
                        tick,
                        job_id,
                        reason: err.to_string(),
                    });
                    num_rejected += 1;
                    self.rejected += 1;
                }
            }
        }

        let pacing = {
            let mut cluster = self.cluster.lock();
            self.scheduler
                .execute(tick, &mut *cluster, &mut self.event_log)?;
            cluster.pacing_delay()
        };
        if !pacing.is_zero() {
            thread::sleep(pacing);
        }

        self.iteration += 1;
        Ok(TickResult {
            tick,
            num_arrivals,
            num_rejected,
            pending: self.scheduler.pending(),
        })
    }

    /// Run until idle or the carbon series is exhausted, then finalize.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        while self.iteration < self.horizon {
            self.tick()?;
            if self.is_done() {
                break;
            }
        }
        self.finish()
    }

    /// Stop the observer, add the reserved holding cost and summarize.
    /// Later calls only re-read the totals.
    pub fn finish(&mut self) -> Result<RunSummary, SimulationError> {
        if !self.finished {
            if let Some(observer) = self.observer.take() {
                observer.stop();
            }
            let holding = self.cluster.lock().finalize()?;
            self.event_log.log(Event::ReservedHolding {
                tick: self.clock.current_tick(),
                cost: holding,
            });
            self.finished = true;
        }

        let (carbon_cost, dollar_cost) = {
            let cluster = self.cluster.lock();
            let ledger = cluster.ledger();
            (ledger.total_carbon_cost(), ledger.total_dollar_cost())
        };
        let summary = RunSummary {
            carbon_cost,
            dollar_cost,
            ticks: self.iteration,
            jobs: self.jobs,
            rejected: self.rejected,
        };
        info!(
            experiment = %self.experiment,
            carbon_cost,
            dollar_cost,
            ticks = summary.ticks,
            jobs = summary.jobs,
            rejected = summary.rejected,
            "simulation finished"
        );
        Ok(summary)
    }

    /// Finalize if needed and hand the run report to `sink`.
    pub fn save_results(&mut self, sink: &mut dyn ResultSink) -> Result<RunReport, SimulationError> {
        self.finish()?;
        let report = {
            let cluster = self.cluster.lock();
            RunReport::from_cluster(
                &*cluster,
                &self.experiment,
                &self.config.task_trace,
                &self.config.result_label(),
            )
        };
        sink.save(&report)?;
        Ok(report)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("experiment", &self.experiment)
            .field("policy", &self.scheduler.policy())
            .field("current_tick", &self.clock.current_tick())
            .field("pending_arrivals", &self.arrivals.len())
            .field("pending", &self.scheduler.pending())
            .finish()
    }
}
