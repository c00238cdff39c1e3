//! Pure simulation cluster
//!
//! Reserved capacity is granted all-or-nothing: a job either fits entirely in
//! the free reserved pool or is billed fully on demand. Spot capacity is
//! unconstrained. Every admitted job accrues carbon for its execution window.

use super::{Admission, Cluster, Disposition, Ledger, LedgerError, TickRates};
use crate::carbon::CarbonSeries;
use crate::models::job::Job;
use crate::search::compute_consumption;
use std::sync::Arc;
use tracing::debug;

/// Simulated cluster backed by a [`Ledger`]
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use carbon_scheduler_core_rs::ledger::{Cluster, CostRates, SimulationCluster};
/// use carbon_scheduler_core_rs::models::job::{Job, JobId, QueueConfig};
/// use carbon_scheduler_core_rs::CarbonSeries;
///
/// let carbon = Arc::new(CarbonSeries::new("x", vec![1.0; 50]));
/// let mut cluster = SimulationCluster::new(carbon, 4, CostRates::default().per_tick(), false);
/// let queues = QueueConfig::new(vec![0]).unwrap();
///
/// let mut job = Job::new(JobId(1), 0, 10, 3, &queues);
/// let admission = cluster.submit(0, &mut job).unwrap();
/// assert_eq!(admission.reserved, 3);
/// assert_eq!(cluster.available_reserved(), 1);
///
/// cluster.refresh(10).unwrap();
/// assert_eq!(cluster.available_reserved(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct SimulationCluster {
    ledger: Ledger,
    carbon: Arc<CarbonSeries>,
    allow_spot: bool,
}

impl SimulationCluster {
    /// The utilization histogram spans the whole carbon series.
    pub fn new(
        carbon: Arc<CarbonSeries>,
        reserved_instances: u32,
        rates: TickRates,
        allow_spot: bool,
    ) -> Self {
        Self {
            ledger: Ledger::new(reserved_instances, carbon.len(), rates),
            carbon,
            allow_spot,
        }
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }
}

impl Cluster for SimulationCluster {
    fn submit(&mut self, tick: usize, job: &mut Job) -> Result<Admission, LedgerError> {
        let window = self.carbon.window(tick, job.planning_horizon());
        let carbon_cost = compute_consumption(job, 0, &window)?.carbon_cost;
        let cpus = job.cpus();
        let ticks = job.duration() as f64;

        let (reserved, on_demand, spot, disposition) =
            if self.allow_spot && job.length_class().is_shortest() {
                (0, 0, true, Disposition::Spot)
            } else if self.ledger.try_grant(cpus) {
                self.ledger.schedule_release(tick + job.duration(), cpus);
                (cpus, 0, false, Disposition::Reserved)
            } else {
                (0, cpus, false, Disposition::OnDemand)
            };

        let rates = *self.ledger.rates();
        let dollar_cost = if spot {
            f64::from(cpus) * ticks * rates.spot
        } else {
            f64::from(on_demand) * ticks * rates.on_demand
        };

        job.set_reserved_grant(reserved);
        self.ledger.accrue(carbon_cost, dollar_cost);
        self.ledger
            .record(tick, job, carbon_cost, dollar_cost, disposition);
        debug!(
            tick,
            job_id = %job.id(),
            reserved,
            on_demand,
            spot,
            carbon_cost,
            dollar_cost,
            "job started"
        );

        Ok(Admission {
            reserved,
            on_demand,
            spot,
            carbon_cost,
            dollar_cost,
        })
    }

    fn refresh(&mut self, tick: usize) -> Result<u32, LedgerError> {
        self.ledger.release_due(tick)
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn allows_spot(&self) -> bool {
        self.allow_spot
    }

    fn finalize(&mut self) -> Result<f64, LedgerError> {
        Ok(self.ledger.finalize())
    }

    fn kind(&self) -> &'static str {
        "simulation"
    }
}
