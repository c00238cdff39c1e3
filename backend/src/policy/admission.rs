//! Deadline-based admission scheduler
//!
//! # Behavior
//!
//! - On submit, a carbon-aware policy searches the window
//!   `[tick, tick + max(duration, expected) + waiting_budget + 1)` and sets the
//!   deadline to the chosen start; otherwise the deadline is
//!   `tick + waiting_budget`.
//! - On execute, entries are visited once in arrival order. An entry is
//!   admitted when its deadline has been reached, or opportunistically when
//!   the policy is cost-aware and the cluster has enough free reserved units
//!   (spot-aware policies only pull jobs outside the shortest class).
//!
//! Visiting earliest arrivals first is what hands scarce reserved capacity to
//! the oldest eligible jobs.

use super::{admit_and_refresh, PendingQueue, Scheduler, SchedulingPolicy};
use crate::carbon::CarbonSeries;
use crate::ledger::{Cluster, LedgerError};
use crate::models::event::{Event, EventLog};
use crate::models::job::Job;
use crate::search::{CarbonPolicy, SearchError};
use std::sync::Arc;
use tracing::debug;

/// Admission scheduler for the carbon, cost and combined policies
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use carbon_scheduler_core_rs::models::event::EventLog;
/// use carbon_scheduler_core_rs::models::job::{Job, JobId, QueueConfig};
/// use carbon_scheduler_core_rs::policy::{AdmissionScheduler, Scheduler, SchedulingPolicy};
/// use carbon_scheduler_core_rs::search::CarbonPolicy;
/// use carbon_scheduler_core_rs::CarbonSeries;
///
/// let carbon = Arc::new(CarbonSeries::new("x", vec![1.0; 100]));
/// let mut scheduler = AdmissionScheduler::new(SchedulingPolicy::Cost, CarbonPolicy::Oracle, carbon);
/// let queues = QueueConfig::new(vec![10]).unwrap();
/// let job = Job::new(JobId(1), 4, 5, 1, &queues);
///
/// assert_eq!(scheduler.deadline(4, &job).unwrap(), 14);
/// scheduler.submit(4, job, &mut EventLog::new()).unwrap();
/// assert_eq!(scheduler.pending(), 1);
/// ```
pub struct AdmissionScheduler {
    policy: SchedulingPolicy,
    carbon_policy: CarbonPolicy,
    carbon: Arc<CarbonSeries>,
    queue: PendingQueue,
}

impl AdmissionScheduler {
    pub fn new(
        policy: SchedulingPolicy,
        carbon_policy: CarbonPolicy,
        carbon: Arc<CarbonSeries>,
    ) -> Self {
        Self {
            policy,
            carbon_policy,
            carbon,
            queue: PendingQueue::new(),
        }
    }

    /// Latest tick `job`, submitted at `tick`, may wait until.
    pub fn deadline(&self, tick: usize, job: &Job) -> Result<usize, SearchError> {
        if !self.policy.carbon_aware() {
            return Ok(tick + job.waiting_budget());
        }
        let length = job.planning_horizon() + job.waiting_budget() + 1;
        let window = self.carbon.window(tick, length);
        let schedule = self.carbon_policy.select(job, &window)?;
        Ok(schedule.actual_start(tick))
    }

    /// Whether a not-yet-due job may take free reserved capacity now.
    pub fn admits_early(&self, job: &Job, available_reserved: u32) -> bool {
        admits_early(self.policy, job, available_reserved)
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }
}

fn admits_early(policy: SchedulingPolicy, job: &Job, available_reserved: u32) -> bool {
    if !policy.cost_aware() || available_reserved < job.cpus() {
        return false;
    }
    !policy.spot_aware() || !job.length_class().is_shortest()
}

impl Scheduler for AdmissionScheduler {
    fn submit(&mut self, tick: usize, job: Job, events: &mut EventLog) -> Result<(), SearchError> {
        let deadline = self.deadline(tick, &job)?;
        debug!(tick, job_id = %job.id(), deadline, "job queued");
        events.log(Event::Deferred {
            tick,
            job_id: job.id(),
            deadline,
        });
        let arrival = job.arrival_tick();
        self.queue.push(job, deadline, arrival);
        Ok(())
    }

    fn execute(
        &mut self,
        tick: usize,
        cluster: &mut dyn Cluster,
        events: &mut EventLog,
    ) -> Result<(), LedgerError> {
        let policy = self.policy;
        admit_and_refresh(&mut self.queue, tick, cluster, events, |job, available| {
            admits_early(policy, job, available)
        })
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn policy(&self) -> SchedulingPolicy {
        self.policy
    }
}
