//! Suspend-resume scheduler
//!
//! A job of duration `D` with waiting budget `W` is laid out over the next
//! `D + W` ticks as a binary admission mask. Contiguous runs of admitted ticks
//! become fragments of the job (same id, own start and length), each queued
//! with the parent arrival so fragments keep their place in arrival order.
//! A single run is queued as the parent job.
//!
//! Two masks are available:
//! - **Optimal**: the `D` lowest-intensity ticks, ties to the earlier tick
//! - **Threshold**: one forward pass admitting ticks below the 30th
//!   percentile of the next 24 hours, or any tick once the waiting budget is
//!   spent
//!
//! Fragments are only ever admitted at their deadline.

use super::{admit_and_refresh, PendingQueue, Scheduler, SchedulingPolicy};
use crate::carbon::CarbonSeries;
use crate::core::time::TICKS_PER_HOUR;
use crate::ledger::{Cluster, LedgerError};
use crate::models::event::{Event, EventLog};
use crate::models::job::{Job, QueueConfig};
use crate::search::SearchError;
use std::sync::Arc;
use tracing::debug;

/// Quantile of upcoming intensity below which the threshold mask runs a job.
pub const THRESHOLD_QUANTILE: f64 = 0.3;

/// Ticks of upcoming intensity the threshold is computed over.
pub const THRESHOLD_LOOKAHEAD_TICKS: usize = 24 * TICKS_PER_HOUR;

/// How the admission mask is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolicy {
    Optimal,
    Threshold,
}

/// Admit the `duration` lowest-intensity ticks of `window`.
///
/// ```
/// use carbon_scheduler_core_rs::policy::optimal_mask;
/// use carbon_scheduler_core_rs::CarbonSeries;
///
/// let window = CarbonSeries::new("x", vec![3.0, 1.0, 2.0, 1.0]);
/// let mask = optimal_mask(&window, 2).unwrap();
/// assert_eq!(mask, vec![false, true, false, true]);
/// ```
pub fn optimal_mask(window: &CarbonSeries, duration: usize) -> Result<Vec<bool>, SearchError> {
    let samples = window.samples();
    if samples.len() < duration {
        return Err(SearchError::IncompleteMask {
            remaining: duration - samples.len(),
        });
    }
    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by(|&a, &b| samples[a].total_cmp(&samples[b]).then(a.cmp(&b)));

    let mut mask = vec![false; samples.len()];
    for &tick in order.iter().take(duration) {
        mask[tick] = true;
    }
    Ok(mask)
}

/// Forward pass admitting ticks below `threshold`, or any tick once
/// `waiting_budget` skipped ticks have been spent.
pub fn threshold_mask(
    window: &CarbonSeries,
    duration: usize,
    waiting_budget: usize,
    threshold: f64,
) -> Result<Vec<bool>, SearchError> {
    let samples = window.samples();
    let mut mask = vec![false; samples.len()];
    let mut remaining = duration;
    let mut budget = waiting_budget;

    for (tick, &intensity) in samples.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if intensity < threshold || budget == 0 {
            mask[tick] = true;
            remaining -= 1;
        } else {
            budget -= 1;
        }
    }

    if remaining != 0 {
        return Err(SearchError::IncompleteMask { remaining });
    }
    Ok(mask)
}

/// Runs of admitted ticks as `(start, length)` pairs.
///
/// ```
/// use carbon_scheduler_core_rs::policy::coalesce_mask;
///
/// let mask = [false, true, false, true, true, false];
/// assert_eq!(coalesce_mask(&mask), vec![(1, 1), (3, 2)]);
/// ```
pub fn coalesce_mask(mask: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (tick, &admitted) in mask.iter().enumerate() {
        match (admitted, start) {
            (true, None) => start = Some(tick),
            (false, Some(begin)) => {
                runs.push((begin, tick - begin));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        runs.push((begin, mask.len() - begin));
    }
    runs
}

/// Scheduler that fragments jobs into low-carbon runs
pub struct SuspendResumeScheduler {
    policy: SchedulingPolicy,
    mask_policy: MaskPolicy,
    carbon: Arc<CarbonSeries>,
    queues: QueueConfig,
    queue: PendingQueue,
}

impl SuspendResumeScheduler {
    pub fn new(
        policy: SchedulingPolicy,
        mask_policy: MaskPolicy,
        carbon: Arc<CarbonSeries>,
        queues: QueueConfig,
    ) -> Self {
        Self {
            policy,
            mask_policy,
            carbon,
            queues,
            queue: PendingQueue::new(),
        }
    }

    /// Admission mask for `job` submitted at `tick`.
    pub fn mask(&self, tick: usize, job: &Job) -> Result<Vec<bool>, SearchError> {
        let window = self
            .carbon
            .window(tick, job.duration() + job.waiting_budget());
        match self.mask_policy {
            MaskPolicy::Optimal => optimal_mask(&window, job.duration()),
            MaskPolicy::Threshold => {
                let threshold = self
                    .carbon
                    .quantile(tick, THRESHOLD_LOOKAHEAD_TICKS, THRESHOLD_QUANTILE)
                    .unwrap_or(f64::INFINITY);
                threshold_mask(&window, job.duration(), job.waiting_budget(), threshold)
            }
        }
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }
}

impl Scheduler for SuspendResumeScheduler {
    fn submit(&mut self, tick: usize, job: Job, events: &mut EventLog) -> Result<(), SearchError> {
        let runs = coalesce_mask(&self.mask(tick, &job)?);
        let arrival = job.arrival_tick();

        if runs.len() <= 1 {
            let deadline = tick + runs.first().map_or(0, |&(start, _)| start);
            debug!(tick, job_id = %job.id(), deadline, "job queued whole");
            events.log(Event::Deferred {
                tick,
                job_id: job.id(),
                deadline,
            });
            self.queue.push(job, deadline, arrival);
            return Ok(());
        }

        debug!(tick, job_id = %job.id(), fragments = runs.len(), "job split");
        events.log(Event::Split {
            tick,
            job_id: job.id(),
            runs: runs.clone(),
        });
        for (start, length) in runs {
            let mut fragment = job.fragment(tick, length, &self.queues);
            if self.mask_policy == MaskPolicy::Threshold {
                fragment = fragment.with_length_class(job.length_class());
            }
            let deadline = tick + start;
            events.log(Event::Deferred {
                tick,
                job_id: job.id(),
                deadline,
            });
            self.queue.push(fragment, deadline, arrival);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        tick: usize,
        cluster: &mut dyn Cluster,
        events: &mut EventLog,
    ) -> Result<(), LedgerError> {
        admit_and_refresh(&mut self.queue, tick, cluster, events, |_, _| false)
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn policy(&self) -> SchedulingPolicy {
        self.policy
    }
}
