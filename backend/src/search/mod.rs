//! Carbon-cost search
//!
//! Pure functions over `(job, carbon window)` that pick when a job should
//! start. Every window is relative: offset 0 is the tick the search is run
//! at, and the returned [`Schedule`] is expressed in the same offsets.
//!
//! Candidate enumeration is lazy: [`feasible_schedules`] yields only the
//! offsets whose window covers the whole job, and an empty sequence is
//! reported as [`SearchError::NoFeasibleSchedule`] instead of being hidden.
//!
//! # Example
//! ```
//! use carbon_scheduler_core_rs::models::job::{Job, JobId, QueueConfig};
//! use carbon_scheduler_core_rs::search::{compute_consumption, lowest_carbon_slot};
//! use carbon_scheduler_core_rs::CarbonSeries;
//!
//! let queues = QueueConfig::new(vec![2]).unwrap();
//! let job = Job::new(JobId(1), 0, 1, 1, &queues);
//! let window = CarbonSeries::new("x", vec![50.0, 10.0, 50.0, 50.0]);
//!
//! assert_eq!(lowest_carbon_slot(&job, &window).unwrap().start, 1);
//! assert_eq!(compute_consumption(&job, 0, &window).unwrap().carbon_cost, 50.0);
//! ```

use crate::carbon::CarbonSeries;
use crate::core::time::TICKS_PER_HOUR;
use crate::models::job::{ConfigError, Job, JobId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while searching for a start time
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    #[error("carbon window too short: job needs {required} ticks, {available} available")]
    InsufficientWindow { required: usize, available: usize },

    #[error("no feasible start offset for job {job_id}")]
    NoFeasibleSchedule { job_id: JobId },

    #[error("admission mask left {remaining} ticks unplaced")]
    IncompleteMask { remaining: usize },
}

/// Result of a carbon-cost search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Start offset relative to the window origin
    pub start: usize,
    /// End offset (exclusive)
    pub end: usize,
    /// CPU demand times the intensity summed over `[start, end)`
    pub carbon_cost: f64,
}

impl Schedule {
    /// Absolute start tick for a window whose origin is `now`.
    pub fn actual_start(&self, now: usize) -> usize {
        now + self.start
    }

    /// Absolute finish tick for a window whose origin is `now`.
    pub fn actual_finish(&self, now: usize) -> usize {
        now + self.end
    }
}

/// Carbon cost of running `job` from `start` inside `window`.
pub fn compute_consumption(
    job: &Job,
    start: usize,
    window: &CarbonSeries,
) -> Result<Schedule, SearchError> {
    let available = window.len().saturating_sub(start);
    if available < job.duration() {
        return Err(SearchError::InsufficientWindow {
            required: job.duration(),
            available,
        });
    }
    Ok(Schedule {
        start,
        end: start + job.duration(),
        carbon_cost: window.sum(start, job.duration()) * f64::from(job.cpus()),
    })
}

/// Start at the single lowest-intensity tick within the waiting budget.
///
/// The chosen tick is not checked for enough trailing samples; a window that
/// ends too soon after it yields `InsufficientWindow`.
pub fn lowest_carbon_slot(job: &Job, window: &CarbonSeries) -> Result<Schedule, SearchError> {
    let start = if job.waiting_budget() != 0 {
        window.argmin(0, job.waiting_budget() + 1).unwrap_or(0)
    } else {
        0
    };
    compute_consumption(job, start, window)
}

/// Every feasible schedule at offsets `0, step, 2*step, ..` up to the waiting
/// budget inclusive, in ascending offset order.
pub fn feasible_schedules<'a>(
    job: &'a Job,
    window: &'a CarbonSeries,
    step: usize,
) -> impl Iterator<Item = Schedule> + 'a {
    (0..=job.waiting_budget())
        .step_by(step.max(1))
        .filter_map(move |start| compute_consumption(job, start, window).ok())
}

/// Minimum-carbon schedule over hourly start offsets.
pub fn oracle_carbon_slot(job: &Job, window: &CarbonSeries) -> Result<Schedule, SearchError> {
    oracle_carbon_slot_stepped(job, window, TICKS_PER_HOUR)
}

/// [`oracle_carbon_slot`] with a configurable offset granularity.
pub fn oracle_carbon_slot_stepped(
    job: &Job,
    window: &CarbonSeries,
    step: usize,
) -> Result<Schedule, SearchError> {
    feasible_schedules(job, window, step)
        .min_by(|a, b| a.carbon_cost.total_cmp(&b.carbon_cost))
        .ok_or(SearchError::NoFeasibleSchedule { job_id: job.id() })
}

/// Schedule with the best carbon saving per tick of completion time.
///
/// Saving is measured against starting immediately (offset 0) and divided by
/// the job's finish offset, so an early good slot beats a late slightly better
/// one. Ties keep the earliest offset.
pub fn oracle_carbon_slot_waiting(
    job: &Job,
    window: &CarbonSeries,
) -> Result<Schedule, SearchError> {
    oracle_carbon_slot_waiting_stepped(job, window, TICKS_PER_HOUR)
}

/// [`oracle_carbon_slot_waiting`] with a configurable offset granularity.
pub fn oracle_carbon_slot_waiting_stepped(
    job: &Job,
    window: &CarbonSeries,
    step: usize,
) -> Result<Schedule, SearchError> {
    let mut candidates = feasible_schedules(job, window, step);
    let immediate = candidates
        .next()
        .filter(|first| first.start == 0)
        .ok_or(SearchError::NoFeasibleSchedule { job_id: job.id() })?;
    let baseline = immediate.carbon_cost;
    let rate = |schedule: &Schedule| {
        (baseline - schedule.carbon_cost) / schedule.end.max(1) as f64
    };

    let mut best = immediate;
    let mut best_rate = rate(&immediate);
    for candidate in candidates {
        let candidate_rate = rate(&candidate);
        if candidate_rate > best_rate {
            best = candidate;
            best_rate = candidate_rate;
        }
    }
    Ok(best)
}

/// Pick the offset with [`oracle_carbon_slot_waiting`] for the queue's
/// representative job, then cost the real job at that offset.
pub fn average_carbon_slot_waiting(
    job: &Job,
    window: &CarbonSeries,
) -> Result<Schedule, SearchError> {
    let chosen = oracle_carbon_slot_waiting(&job.representative(), window)?;
    compute_consumption(job, chosen.start, window)
}

/// Pick the offset with [`oracle_carbon_slot`] for the queue's representative
/// job, then cost the real job at that offset.
pub fn best_waiting_time(job: &Job, window: &CarbonSeries) -> Result<Schedule, SearchError> {
    let chosen = oracle_carbon_slot(&job.representative(), window)?;
    compute_consumption(job, chosen.start, window)
}

/// Start-time selection policy used by carbon-aware schedulers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarbonPolicy {
    /// [`best_waiting_time`]
    #[serde(rename = "waiting")]
    Waiting,
    /// [`lowest_carbon_slot`]
    #[serde(rename = "lowest")]
    Lowest,
    /// [`oracle_carbon_slot`]
    #[serde(rename = "oracle")]
    Oracle,
    /// [`oracle_carbon_slot_waiting`]
    #[serde(rename = "cst_oracle")]
    OracleWaiting,
    /// [`average_carbon_slot_waiting`]
    #[serde(rename = "cst_average")]
    AverageWaiting,
}

impl CarbonPolicy {
    /// Configuration tag of this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            CarbonPolicy::Waiting => "waiting",
            CarbonPolicy::Lowest => "lowest",
            CarbonPolicy::Oracle => "oracle",
            CarbonPolicy::OracleWaiting => "cst_oracle",
            CarbonPolicy::AverageWaiting => "cst_average",
        }
    }

    /// Run this policy's search.
    pub fn select(&self, job: &Job, window: &CarbonSeries) -> Result<Schedule, SearchError> {
        match self {
            CarbonPolicy::Waiting => best_waiting_time(job, window),
            CarbonPolicy::Lowest => lowest_carbon_slot(job, window),
            CarbonPolicy::Oracle => oracle_carbon_slot(job, window),
            CarbonPolicy::OracleWaiting => oracle_carbon_slot_waiting(job, window),
            CarbonPolicy::AverageWaiting => average_carbon_slot_waiting(job, window),
        }
    }
}

impl fmt::Display for CarbonPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarbonPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(CarbonPolicy::Waiting),
            "lowest" => Ok(CarbonPolicy::Lowest),
            "oracle" => Ok(CarbonPolicy::Oracle),
            "cst_oracle" => Ok(CarbonPolicy::OracleWaiting),
            "cst_average" => Ok(CarbonPolicy::AverageWaiting),
            other => Err(ConfigError::UnknownPolicy {
                kind: "carbon",
                name: other.to_string(),
            }),
        }
    }
}
