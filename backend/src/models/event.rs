//! Event logging for simulation replay and auditing.
//!
//! This module defines the Event enum which captures every scheduling decision
//! and capacity change during a run. Events enable:
//! - Debugging (why did a job start when it did)
//! - Auditing (verify reserved capacity is granted and released consistently)
//! - Analysis (deferral and splitting patterns per policy)
//!
//! # Event Types
//!
//! - **Arrival**: a job reached the scheduler
//! - **Deferred**: the scheduler queued a job (or fragment) with a deadline
//! - **Split**: suspend-resume fragmented a job into several runs
//! - **Rejected**: no feasible start could be found for a job
//! - **Admitted**: a queued entry was submitted to the cluster
//! - **Released**: reserved capacity returned to the pool
//! - **ReservedHolding**: the one-off reserved-instance cost at the end of a run
//!
//! # Example
//!
//! ```rust
//! use carbon_scheduler_core_rs::models::event::{Event, EventLog};
//! use carbon_scheduler_core_rs::models::job::JobId;
//!
//! let mut log = EventLog::new();
//! log.log(Event::Deferred {
//!     tick: 10,
//!     job_id: JobId(42),
//!     deadline: 25,
//! });
//!
//! assert_eq!(log.events_for_job(JobId(42)).len(), 1);
//! ```

use crate::models::job::JobId;

/// Simulation event capturing a scheduling decision or capacity change.
///
/// All events include a tick number for temporal ordering.
/// Events are logged in the order they occur within a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Job arrived at the scheduler
    Arrival {
        tick: usize,
        job_id: JobId,
        duration: usize,
        cpus: u32,
        waiting_budget: usize,
    },

    /// Job (or fragment) queued until at most `deadline`
    Deferred {
        tick: usize,
        job_id: JobId,
        deadline: usize,
    },

    /// Job fragmented into runs of `(start_offset, length)` ticks
    Split {
        tick: usize,
        job_id: JobId,
        runs: Vec<(usize, usize)>,
    },

    /// Job dropped because no start time fits the carbon trace
    Rejected {
        tick: usize,
        job_id: JobId,
        reason: String,
    },

    /// Queued entry submitted to the cluster
    Admitted {
        tick: usize,
        job_id: JobId,
        cpus: u32,
        reserved: u32,
        spot: bool,
        /// Admitted because its deadline was reached rather than opportunistically
        forced: bool,
    },

    /// Reserved units returned to the pool
    Released { tick: usize, units: u32 },

    /// Reserved-instance holding cost added at finalize
    ReservedHolding { tick: usize, cost: f64 },
}

impl Event {
    /// Get the tick when this event occurred
    pub fn tick(&self) -> usize {
        match self {
            Event::Arrival { tick, .. } => *tick,
            Event::Deferred { tick, .. } => *tick,
            Event::Split { tick, .. } => *tick,
            Event::Rejected { tick, .. } => *tick,
            Event::Admitted { tick, .. } => *tick,
            Event::Released { tick, .. } => *tick,
            Event::ReservedHolding { tick, .. } => *tick,
        }
    }

    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Arrival { .. } => "Arrival",
            Event::Deferred { .. } => "Deferred",
            Event::Split { .. } => "Split",
            Event::Rejected { .. } => "Rejected",
            Event::Admitted { .. } => "Admitted",
            Event::Released { .. } => "Released",
            Event::ReservedHolding { .. } => "ReservedHolding",
        }
    }

    /// Get the job this event refers to (if any)
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::Arrival { job_id, .. }
            | Event::Deferred { job_id, .. }
            | Event::Split { job_id, .. }
            | Event::Rejected { job_id, .. }
            | Event::Admitted { job_id, .. } => Some(*job_id),
            Event::Released { .. } | Event::ReservedHolding { .. } => None,
        }
    }
}

/// Event log for storing simulation history
///
/// This is a simple wrapper around Vec<Event> with convenience methods.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Create new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Log an event
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Get total number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get all events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Get events at a specific tick
    pub fn events_at_tick(&self, tick: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.tick() == tick).collect()
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events for a specific job
    pub fn events_for_job(&self, job_id: JobId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.job_id() == Some(job_id))
            .collect()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(tick: usize, id: u64) -> Event {
        Event::Admitted {
            tick,
            job_id: JobId(id),
            cpus: 2,
            reserved: 2,
            spot: false,
            forced: true,
        }
    }

    #[test]
    fn test_event_type_and_tick() {
        let event = Event::Released { tick: 7, units: 3 };
        assert_eq!(event.tick(), 7);
        assert_eq!(event.event_type(), "Released");
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn test_event_log_queries() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.log(Event::Arrival {
            tick: 1,
            job_id: JobId(1),
            duration: 10,
            cpus: 2,
            waiting_budget: 5,
        });
        log.log(admitted(1, 1));
        log.log(admitted(2, 2));
        log.log(Event::Released { tick: 2, units: 2 });

        assert_eq!(log.len(), 4);
        assert_eq!(log.events_at_tick(1).len(), 2);
        assert_eq!(log.events_of_type("Admitted").len(), 2);
        assert_eq!(log.events_for_job(JobId(1)).len(), 2);

        log.clear();
        assert!(log.is_empty());
    }
}
