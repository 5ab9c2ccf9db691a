//! Monitoring Execution
//!
//! For each enabled rule of a monitoring job's ontology, pull the
//! time-series window the rule family needs, evaluate the condition, and
//! upsert alerts through the fingerprint-deduplicated store path.
//!
//! A single rule failing (missing data, math error) is logged and skipped;
//! the run as a whole fails only when every evaluation errored. Alerts are
//! never auto-resolved — resolution is an explicit user action.

mod executor;
mod rules;

pub use executor::MonitoringExecutor;
pub use rules::{evaluate_window, linear_fit};
