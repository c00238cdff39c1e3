//! Time management and process-wide telemetry setup

pub mod telemetry;
pub mod time;
