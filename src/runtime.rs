//! Runtime glue: validated configuration, telemetry, fatal-error fan-out,
//! backoff helpers, and the top-level runner.

pub mod backoff;
pub mod config;
pub mod fatal;
pub mod runner;
pub mod telemetry;
