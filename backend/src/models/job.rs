//! Job model
//!
//! Represents a unit of compute work taken from a cluster trace.
//! Each job has:
//! - Opaque ID, arrival tick, true duration (ticks) and CPU demand
//! - Length class and resource class (fixed, ordered buckets)
//! - Queue routing: expected duration and waiting budget
//! - A reserved-capacity grant assigned when the job is submitted
//!
//! Classification never reads ambient state: the waiting budgets and average
//! durations of the queues live in an explicit [`QueueConfig`] that is passed
//! to [`Job::new`].

use crate::core::time::{TICKS_PER_HOUR, TIME_FACTOR};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Jobs strictly shorter than this many ticks go to the short queue.
pub const SHORT_QUEUE_BOUNDARY: usize = 2 * TICKS_PER_HOUR;

/// Expected duration handed to every job when a single queue is configured.
pub const SAME_QUEUE_EXPECTED_DURATION: usize = 2;

/// Configuration errors raised before a simulation starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} waiting-time queues configured, only one or two are supported")]
    UnsupportedQueueCount(usize),

    #[error("invalid waiting times {input:?}: {reason}")]
    InvalidWaitingTimes { input: String, reason: String },

    #[error("unknown {kind} policy: {name}")]
    UnknownPolicy { kind: &'static str, name: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Opaque job identifier taken from the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bucketed job duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LengthClass {
    #[serde(rename = "0-2")]
    UpTo2,
    #[serde(rename = "2-6")]
    UpTo6,
    #[serde(rename = "6-12")]
    UpTo12,
    #[serde(rename = "12-24")]
    UpTo24,
    #[serde(rename = "24-48")]
    UpTo48,
    #[serde(rename = "48+")]
    Over48,
}

impl LengthClass {
    /// Classify a duration given in ticks.
    ///
    /// ```
    /// use carbon_scheduler_core_rs::models::job::LengthClass;
    ///
    /// assert_eq!(LengthClass::from_ticks(720 * 2), LengthClass::UpTo2);
    /// assert_eq!(LengthClass::from_ticks(720 * 3), LengthClass::UpTo6);
    /// ```
    pub fn from_ticks(duration: usize) -> Self {
        let hours = duration as f64 / TICKS_PER_HOUR as f64;
        if hours <= 2.0 {
            LengthClass::UpTo2
        } else if hours <= 4.0 {
            LengthClass::UpTo6
        } else if hours <= 8.0 {
            LengthClass::UpTo12
        } else if hours <= 16.0 {
            LengthClass::UpTo24
        } else if hours <= 48.0 {
            LengthClass::UpTo48
        } else {
            LengthClass::Over48
        }
    }

    /// Label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            LengthClass::UpTo2 => "0-2",
            LengthClass::UpTo6 => "2-6",
            LengthClass::UpTo12 => "6-12",
            LengthClass::UpTo24 => "12-24",
            LengthClass::UpTo48 => "24-48",
            LengthClass::Over48 => "48+",
        }
    }

    /// The shortest bucket; these jobs are eligible for spot capacity.
    pub fn is_shortest(&self) -> bool {
        matches!(self, LengthClass::UpTo2)
    }
}

/// Bucketed CPU demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceClass {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3-4")]
    UpTo4,
    #[serde(rename = "5-8")]
    UpTo8,
    #[serde(rename = "9-16")]
    UpTo16,
    #[serde(rename = "17-32")]
    UpTo32,
    #[serde(rename = "33-64")]
    UpTo64,
    #[serde(rename = "64+")]
    Over64,
}

impl ResourceClass {
    /// Classify a CPU count.
    pub fn from_cpus(cpus: u32) -> Self {
        match cpus {
            0 | 1 => ResourceClass::One,
            2 => ResourceClass::Two,
            3..=4 => ResourceClass::UpTo4,
            5..=8 => ResourceClass::UpTo8,
            9..=16 => ResourceClass::UpTo16,
            17..=32 => ResourceClass::UpTo32,
            33..=64 => ResourceClass::UpTo64,
            _ => ResourceClass::Over64,
        }
    }

    /// Label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceClass::One => "1",
            ResourceClass::Two => "2",
            ResourceClass::UpTo4 => "3-4",
            ResourceClass::UpTo8 => "5-8",
            ResourceClass::UpTo16 => "9-16",
            ResourceClass::UpTo32 => "17-32",
            ResourceClass::UpTo64 => "33-64",
            ResourceClass::Over64 => "64+",
        }
    }
}

/// Which waiting-time queue a job was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// Single-queue configuration
    Same,
    Short,
    Long,
}

/// Outcome of routing a duration through the queues
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueAssignment {
    pub kind: QueueKind,
    pub waiting_budget: usize,
    pub expected_duration: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RunningMean {
    mean: f64,
    count: u64,
}

impl RunningMean {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

/// Waiting-time queue configuration used to classify jobs
///
/// One queue gives every job the same waiting budget. Two queues split jobs
/// at [`SHORT_QUEUE_BOUNDARY`]; each keeps its own budget and the average
/// duration of the jobs observed in it.
///
/// # Example
/// ```
/// use carbon_scheduler_core_rs::models::job::{QueueConfig, QueueKind};
///
/// let queues = QueueConfig::parse_waiting_times("6x24").unwrap();
/// assert_eq!(queues.waiting_budgets(), &[6 * 720, 24 * 720]);
///
/// let routed = queues.route(100);
/// assert_eq!(routed.kind, QueueKind::Short);
/// assert_eq!(routed.waiting_budget, 6 * 720);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    waiting_budgets: Vec<usize>,
    averages: [RunningMean; 2],
}

impl QueueConfig {
    /// Create a configuration from waiting budgets expressed in ticks.
    pub fn new(waiting_budgets: Vec<usize>) -> Result<Self, ConfigError> {
        match waiting_budgets.len() {
            1 | 2 => Ok(Self {
                waiting_budgets,
                averages: Default::default(),
            }),
            n => Err(ConfigError::UnsupportedQueueCount(n)),
        }
    }

    /// Parse an `x`-separated list of waiting times in hours, e.g. `"6x24"`.
    pub fn parse_waiting_times(input: &str) -> Result<Self, ConfigError> {
        let budgets = input
            .split('x')
            .map(|part| {
                let hours: f64 =
                    part.trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidWaitingTimes {
                            input: input.to_string(),
                            reason: format!("{part:?} is not a number of hours"),
                        })?;
                if !hours.is_finite() || hours < 0.0 {
                    return Err(ConfigError::InvalidWaitingTimes {
                        input: input.to_string(),
                        reason: format!("{part:?} must be a non-negative number of hours"),
                    });
                }
                Ok((hours * 3600.0 / TIME_FACTOR as f64) as usize)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(budgets)
    }

    /// Seed both queue averages explicitly (ticks).
    pub fn with_averages(mut self, short: f64, long: f64) -> Self {
        self.averages = [
            RunningMean {
                mean: short,
                count: 1,
            },
            RunningMean {
                mean: long,
                count: 1,
            },
        ];
        self
    }

    /// Seed the queue averages from every duration of a trace.
    ///
    /// The short average covers durations up to and including the boundary,
    /// the long average durations from the boundary up, so a job of exactly
    /// the boundary length counts towards both.
    pub fn with_trace_averages(mut self, durations: &[usize]) -> Self {
        let mut short = RunningMean::default();
        let mut long = RunningMean::default();
        for &duration in durations {
            if duration <= SHORT_QUEUE_BOUNDARY {
                short.observe(duration as f64);
            }
            if duration >= SHORT_QUEUE_BOUNDARY {
                long.observe(duration as f64);
            }
        }
        self.averages = [short, long];
        self
    }

    /// Fold one more observed duration into its queue's running average.
    pub fn observe(&mut self, duration: usize) {
        let slot = usize::from(duration >= SHORT_QUEUE_BOUNDARY);
        self.averages[slot].observe(duration as f64);
    }

    /// Waiting budgets in ticks, one per queue.
    pub fn waiting_budgets(&self) -> &[usize] {
        &self.waiting_budgets
    }

    /// Running average duration of a queue, if any job has been observed.
    pub fn average_duration(&self, kind: QueueKind) -> Option<f64> {
        match kind {
            QueueKind::Same => None,
            QueueKind::Short => self.averages[0].value(),
            QueueKind::Long => self.averages[1].value(),
        }
    }

    /// Route a duration to its queue.
    ///
    /// A queue with no observed jobs falls back to the job's own duration as
    /// its expected duration.
    pub fn route(&self, duration: usize) -> QueueAssignment {
        if let [budget] = self.waiting_budgets[..] {
            return QueueAssignment {
                kind: QueueKind::Same,
                waiting_budget: budget,
                expected_duration: SAME_QUEUE_EXPECTED_DURATION,
            };
        }
        let (kind, waiting_budget) = if duration < SHORT_QUEUE_BOUNDARY {
            (QueueKind::Short, self.waiting_budgets[0])
        } else {
            (QueueKind::Long, self.waiting_budgets[1])
        };
        let expected_duration = self
            .average_duration(kind)
            .map_or(duration, |average| average as usize);
        QueueAssignment {
            kind,
            waiting_budget,
            expected_duration,
        }
    }
}

/// A raw job as it appears in an arrival trace, before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceJob {
    pub id: JobId,
    pub arrival: usize,
    pub duration: usize,
    pub cpus: u32,
}

impl TraceJob {
    pub fn new(id: u64, arrival: usize, duration: usize, cpus: u32) -> Self {
        Self {
            id: JobId(id),
            arrival,
            duration,
            cpus,
        }
    }

    /// Classify against the current queue configuration.
    pub fn classify(&self, queues: &QueueConfig) -> Job {
        Job::new(self.id, self.arrival, self.duration, self.cpus, queues)
    }
}

/// A compute job
///
/// # Example
/// ```
/// use carbon_scheduler_core_rs::models::job::{Job, JobId, LengthClass, QueueConfig};
///
/// let queues = QueueConfig::new(vec![10, 20]).unwrap();
/// let job = Job::new(JobId(7), 3, 100, 4, &queues);
/// assert_eq!(job.length_class(), LengthClass::UpTo2);
/// assert_eq!(job.waiting_budget(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    arrival_tick: usize,
    duration: usize,
    cpus: u32,
    length_class: LengthClass,
    resource_class: ResourceClass,
    queue: QueueKind,
    expected_duration: usize,
    waiting_budget: usize,
    reserved_grant: Option<u32>,
}

impl Job {
    /// Create and classify a job.
    pub fn new(id: JobId, arrival_tick: usize, duration: usize, cpus: u32, queues: &QueueConfig) -> Self {
        let routed = queues.route(duration);
        Self {
            id,
            arrival_tick,
            duration,
            cpus,
            length_class: LengthClass::from_ticks(duration),
            resource_class: ResourceClass::from_cpus(cpus),
            queue: routed.kind,
            expected_duration: routed.expected_duration,
            waiting_budget: routed.waiting_budget,
            reserved_grant: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn arrival_tick(&self) -> usize {
        self.arrival_tick
    }

    /// True duration in ticks
    pub fn duration(&self) -> usize {
        self.duration
    }

    pub fn cpus(&self) -> u32 {
        self.cpus
    }

    pub fn length_class(&self) -> LengthClass {
        self.length_class
    }

    pub fn resource_class(&self) -> ResourceClass {
        self.resource_class
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Duration estimate available at arrival (queue average)
    pub fn expected_duration(&self) -> usize {
        self.expected_duration
    }

    /// Maximum ticks this job may be delayed
    pub fn waiting_budget(&self) -> usize {
        self.waiting_budget
    }

    /// Reserved units granted at submission, if submitted.
    pub fn reserved_grant(&self) -> Option<u32> {
        self.reserved_grant
    }

    /// Record the reserved units granted when the job was submitted.
    pub fn set_reserved_grant(&mut self, units: u32) {
        self.reserved_grant = Some(units);
    }

    /// `max(duration, expected_duration)`, the span a carbon window must cover
    /// for this job whichever of the two durations a search uses.
    pub fn planning_horizon(&self) -> usize {
        self.duration.max(self.expected_duration)
    }

    /// A stand-in job whose duration is the queue's expected duration, used
    /// to pick a start time without knowing the true duration. Keeps this
    /// job's identity, demand and waiting budget.
    pub fn representative(&self) -> Self {
        Self {
            duration: self.expected_duration,
            length_class: LengthClass::from_ticks(self.expected_duration),
            reserved_grant: None,
            ..self.clone()
        }
    }

    /// A fragment of this job for suspend-resume scheduling, classified by its
    /// own length.
    pub fn fragment(&self, arrival_tick: usize, duration: usize, queues: &QueueConfig) -> Self {
        Self::new(self.id, arrival_tick, duration, self.cpus, queues)
    }

    /// Override the length class (fragments that keep their parent's class).
    pub fn with_length_class(mut self, length_class: LengthClass) -> Self {
        self.length_class = length_class;
        self
    }
}
