//! Orchestrator - the simulation driver
//!
//! See `engine.rs` for the tick loop.

pub mod engine;

pub use engine::{
    AverageMode, ClusterMode, Orchestrator, RunSummary, SimulationConfig, SimulationError,
    TickResult,
};
