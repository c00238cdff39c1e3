//! Scheduling Policy Module
//!
//! Schedulers sit between job arrivals and the cluster. They decide **when**
//! each job may start (its deadline) and, once per tick, which queued jobs are
//! handed to the cluster.
//!
//! # Scheduler Interface
//!
//! - `submit(tick, job)` computes a deadline and enqueues the job
//! - `execute(tick, cluster)` drains the queue once in arrival order, admits
//!   every entry that is due (or opportunistically admissible), carries the
//!   rest into the next tick and then refreshes the cluster
//!
//! # Available policies
//!
//! 1. **Carbon / CarbonSpot**: carbon-aware deadline, admit only when due
//! 2. **CarbonCost / CarbonCostSpot**: carbon-aware deadline, plus admit early
//!    while reserved capacity is free (spot variant: long jobs only)
//! 3. **Cost**: deadline = arrival + waiting budget, admit early on free
//!    reserved capacity
//! 4. **SuspendOptimal / SuspendThreshold**: split jobs into low-carbon runs
//!    (see [`suspend`])
//!
//! Policies are built through [`create_scheduler`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use carbon_scheduler_core_rs::models::job::QueueConfig;
//! use carbon_scheduler_core_rs::policy::{create_scheduler, SchedulingPolicy};
//! use carbon_scheduler_core_rs::search::CarbonPolicy;
//! use carbon_scheduler_core_rs::CarbonSeries;
//!
//! let policy: SchedulingPolicy = "carbon-cost".parse().unwrap();
//! let carbon = Arc::new(CarbonSeries::new("AU-SA", vec![1.0; 100]));
//! let queues = QueueConfig::parse_waiting_times("6x24").unwrap();
//! let scheduler = create_scheduler(policy, CarbonPolicy::Oracle, carbon, queues);
//! assert_eq!(scheduler.pending(), 0);
//! ```

pub mod admission;
pub mod suspend;

use crate::carbon::CarbonSeries;
use crate::ledger::{Cluster, LedgerError};
use crate::models::event::{Event, EventLog};
use crate::models::job::{ConfigError, Job, QueueConfig};
use crate::search::{CarbonPolicy, SearchError};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub use admission::AdmissionScheduler;
pub use suspend::{coalesce_mask, optimal_mask, threshold_mask, MaskPolicy, SuspendResumeScheduler};

/// Turns arrivals into admissions
pub trait Scheduler: Send {
    /// Compute a deadline for `job` and enqueue it.
    fn submit(&mut self, tick: usize, job: Job, events: &mut EventLog) -> Result<(), SearchError>;

    /// Admit due entries to `cluster`, keep the rest, then refresh the
    /// cluster for `tick`.
    fn execute(
        &mut self,
        tick: usize,
        cluster: &mut dyn Cluster,
        events: &mut EventLog,
    ) -> Result<(), LedgerError>;

    /// Entries still queued.
    fn pending(&self) -> usize;

    fn policy(&self) -> SchedulingPolicy;
}

/// Scheduling policy selected by configuration tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulingPolicy {
    Carbon,
    CarbonSpot,
    CarbonCost,
    CarbonCostSpot,
    Cost,
    SuspendOptimal { spot: bool },
    SuspendThreshold { spot: bool },
}

impl SchedulingPolicy {
    /// Configuration tag of this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::Carbon => "carbon",
            SchedulingPolicy::CarbonSpot => "carbon-spot",
            SchedulingPolicy::CarbonCost => "carbon-cost",
            SchedulingPolicy::CarbonCostSpot => "carbon-cost-spot",
            SchedulingPolicy::Cost => "cost",
            SchedulingPolicy::SuspendOptimal { spot: false } => "suspend-resume",
            SchedulingPolicy::SuspendOptimal { spot: true } => "suspend-resume-spot",
            SchedulingPolicy::SuspendThreshold { spot: false } => "suspend-resume-threshold",
            SchedulingPolicy::SuspendThreshold { spot: true } => "suspend-resume-spot-threshold",
        }
    }

    /// Deadlines come from a carbon search.
    pub fn carbon_aware(&self) -> bool {
        matches!(
            self,
            SchedulingPolicy::Carbon
                | SchedulingPolicy::CarbonSpot
                | SchedulingPolicy::CarbonCost
                | SchedulingPolicy::CarbonCostSpot
        )
    }

    /// Queued jobs may start early on free reserved capacity.
    pub fn cost_aware(&self) -> bool {
        matches!(
            self,
            SchedulingPolicy::CarbonCost | SchedulingPolicy::CarbonCostSpot | SchedulingPolicy::Cost
        )
    }

    /// Short jobs run on spot capacity.
    pub fn spot_aware(&self) -> bool {
        matches!(
            self,
            SchedulingPolicy::CarbonSpot
                | SchedulingPolicy::CarbonCostSpot
                | SchedulingPolicy::SuspendOptimal { spot: true }
                | SchedulingPolicy::SuspendThreshold { spot: true }
        )
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carbon" => Ok(SchedulingPolicy::Carbon),
            "carbon-spot" => Ok(SchedulingPolicy::CarbonSpot),
            "carbon-cost" => Ok(SchedulingPolicy::CarbonCost),
            "carbon-cost-spot" => Ok(SchedulingPolicy::CarbonCostSpot),
            "cost" => Ok(SchedulingPolicy::Cost),
            "suspend-resume" => Ok(SchedulingPolicy::SuspendOptimal { spot: false }),
            "suspend-resume-spot" => Ok(SchedulingPolicy::SuspendOptimal { spot: true }),
            "suspend-resume-threshold" => Ok(SchedulingPolicy::SuspendThreshold { spot: false }),
            "suspend-resume-spot-threshold" => {
                Ok(SchedulingPolicy::SuspendThreshold { spot: true })
            }
            other => Err(ConfigError::UnknownPolicy {
                kind: "scheduling",
                name: other.to_string(),
            }),
        }
    }
}

/// Build the scheduler for `policy`.
pub fn create_scheduler(
    policy: SchedulingPolicy,
    carbon_policy: CarbonPolicy,
    carbon: Arc<CarbonSeries>,
    queues: QueueConfig,
) -> Box<dyn Scheduler> {
    match policy {
        SchedulingPolicy::SuspendOptimal { .. } => Box::new(SuspendResumeScheduler::new(
            policy,
            MaskPolicy::Optimal,
            carbon,
            queues,
        )),
        SchedulingPolicy::SuspendThreshold { .. } => Box::new(SuspendResumeScheduler::new(
            policy,
            MaskPolicy::Threshold,
            carbon,
            queues,
        )),
        _ => Box::new(AdmissionScheduler::new(policy, carbon_policy, carbon)),
    }
}

/// A job (or fragment) waiting for admission
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub job: Job,
    /// Latest tick the entry may wait until
    pub deadline: usize,
    /// Arrival of the parent job; orders the queue
    pub arrival: usize,
    seq: u64,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest arrival first, FIFO among equal arrivals (reversed for max-heap)
        other
            .arrival
            .cmp(&self.arrival)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Arrival-ordered pending queue
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<QueuedEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job, deadline: usize, arrival: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEntry {
            job,
            deadline,
            arrival,
            seq,
        });
    }

    /// Remove the entry with the earliest arrival.
    pub fn pop(&mut self) -> Option<QueuedEntry> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueuedEntry> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain once in arrival order. `admit` decides whether an entry leaves
    /// the queue now; entries it keeps are carried over unchanged.
    pub fn drain_admitting<F>(&mut self, mut admit: F) -> Result<(), LedgerError>
    where
        F: FnMut(&mut QueuedEntry) -> Result<bool, LedgerError>,
    {
        let mut kept = Vec::with_capacity(self.heap.len());
        while let Some(mut entry) = self.heap.pop() {
            if !admit(&mut entry)? {
                kept.push(entry);
            }
        }
        self.heap = BinaryHeap::from(kept);
        Ok(())
    }
}

/// Shared execute step: admit entries whose deadline has been reached or that
/// `opportunistic` accepts given the free reserved units, then refresh.
pub(crate) fn admit_and_refresh<F>(
    queue: &mut PendingQueue,
    tick: usize,
    cluster: &mut dyn Cluster,
    events: &mut EventLog,
    opportunistic: F,
) -> Result<(), LedgerError>
where
    F: Fn(&Job, u32) -> bool,
{
    queue.drain_admitting(|entry| {
        let forced = tick >= entry.deadline;
        if !forced && !opportunistic(&entry.job, cluster.available_reserved()) {
            return Ok(false);
        }
        let admission = cluster.submit(tick, &mut entry.job)?;
        debug!(
            tick,
            job_id = %entry.job.id(),
            deadline = entry.deadline,
            forced,
            reserved = admission.reserved,
            on_demand = admission.on_demand,
            "job admitted"
        );
        events.log(Event::Admitted {
            tick,
            job_id: entry.job.id(),
            cpus: entry.job.cpus(),
            reserved: admission.reserved,
            spot: admission.spot,
            forced,
        });
        Ok(true)
    })?;

    let released = cluster.refresh(tick)?;
    if released > 0 {
        events.log(Event::Released {
            tick,
            units: released,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobId;

    fn job(id: u64, arrival: usize) -> Job {
        let queues = QueueConfig::new(vec![0]).unwrap();
        Job::new(JobId(id), arrival, 5, 1, &queues)
    }

    #[test]
    fn test_queue_pops_earliest_arrival_then_fifo() {
        let mut queue = PendingQueue::new();
        queue.push(job(1, 5), 0, 5);
        queue.push(job(2, 3), 0, 3);
        queue.push(job(3, 5), 0, 5);
        queue.push(job(4, 3), 0, 3);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|entry| entry.job.id().0)
            .collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_drain_keeps_order_of_carried_entries() {
        let mut queue = PendingQueue::new();
        for id in 0..4 {
            queue.push(job(id, 1), 0, 1);
        }
        queue
            .drain_admitting(|entry| Ok(entry.job.id().0 % 2 == 0))
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().job.id(), JobId(1));
        assert_eq!(queue.pop().unwrap().job.id(), JobId(3));
    }

    #[test]
    fn test_policy_tags_round_trip() {
        for tag in [
            "carbon",
            "carbon-spot",
            "carbon-cost",
            "carbon-cost-spot",
            "cost",
            "suspend-resume",
            "suspend-resume-spot",
            "suspend-resume-threshold",
            "suspend-resume-spot-threshold",
        ] {
            let policy: SchedulingPolicy = tag.parse().unwrap();
            assert_eq!(policy.as_str(), tag);
            assert_eq!(policy.spot_aware(), tag.contains("spot"));
        }
        assert!(matches!(
            "fifo".parse::<SchedulingPolicy>(),
            Err(ConfigError::UnknownPolicy {
                kind: "scheduling",
                ..
            })
        ));
    }

    #[test]
    fn test_policy_flags() {
        assert!(SchedulingPolicy::Cost.cost_aware());
        assert!(!SchedulingPolicy::Cost.carbon_aware());
        assert!(SchedulingPolicy::CarbonCostSpot.carbon_aware());
        assert!(!SchedulingPolicy::SuspendOptimal { spot: true }.cost_aware());
    }
}
