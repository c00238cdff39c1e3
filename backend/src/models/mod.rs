//! Domain models for the carbon-aware scheduler

pub mod event;
pub mod job;

// Re-exports
pub use event::{Event, EventLog};
pub use job::{
    ConfigError, Job, JobId, LengthClass, QueueConfig, QueueKind, ResourceClass, TraceJob,
};
