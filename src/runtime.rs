//! Runtime glue: configuration, alerting, fatal-error capture, telemetry, and
//! runner orchestration.

pub mod alerts;
pub mod config;
pub mod fatal;
pub mod runner;
pub mod settings;
pub mod telemetry;
pub(crate) mod wait;
