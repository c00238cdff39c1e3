//! Carbon Scheduler Core - Rust Engine
//!
//! Carbon- and cost-aware batch job scheduling over a reserved/on-demand/spot
//! cluster, driven tick by tick against a carbon intensity trace.
//!
//! # Architecture
//!
//! - **core**: Tick clock and telemetry setup
//! - **carbon**: Carbon intensity series and window helpers
//! - **models**: Jobs, queues and the event log
//! - **search**: Start-time search over a carbon window
//! - **ledger**: Reserved-capacity accounting, simulated and live clusters
//! - **policy**: Admission and suspend-resume schedulers
//! - **orchestrator**: Main simulation loop
//!
//! # Critical Invariants
//!
//! 1. Reserved units in use never exceed the configured pool
//! 2. Time is measured in ticks of `TIME_FACTOR` seconds
//! 3. A simulation run is deterministic for a given trace and config

// Module declarations
pub mod carbon;
pub mod core;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod search;

// Re-exports for convenience
pub use carbon::CarbonSeries;
pub use core::telemetry::init_tracing;
pub use core::time::{TickClock, TICKS_PER_HOUR, TIME_FACTOR};
pub use ledger::{Cluster, CostRates, Ledger, LedgerError, SimulationCluster};
pub use models::{
    event::{Event, EventLog},
    job::{ConfigError, Job, JobId, QueueConfig, TraceJob},
};
pub use orchestrator::{Orchestrator, RunSummary, SimulationConfig, SimulationError, TickResult};
pub use policy::{Scheduler, SchedulingPolicy};
pub use search::{CarbonPolicy, Schedule, SearchError};
