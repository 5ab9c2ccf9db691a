//! Mimir AIP Execution Core
//!
//! Turns declarative pipeline definitions into reliable runs, keeps
//! scheduled jobs alive across process restarts, and coordinates the
//! plugin, scheduler, persistence, monitoring and simulation subsystems.
//!
//! ## Architecture
//!
//! - **Plugin Registry & Pipeline Executor**: typed plugin catalog with
//!   schema-validated configs; sequential step execution over a shared
//!   per-run context
//! - **Persistent Cron Scheduler**: durable job set, coarse tick loop,
//!   orphan sweep and `next_run` recomputation on boot
//! - **Monitoring Executor**: threshold / trend / anomaly / forecast rules
//!   over stored time series, with fingerprint-deduplicated alerts
//! - **Simulation Engine**: discrete-event stepping over a digital twin
//!   with cross-entity impact propagation and NaN-free metrics

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod monitoring;
pub mod pipeline;
pub mod plugins;
pub mod scheduler;
pub mod simulation;
pub mod storage;
pub mod types;

// Re-export the error taxonomy
pub use error::CoreError;

// Re-export component entry points
pub use monitoring::MonitoringExecutor;
pub use pipeline::{ExecutionOptions, PipelineExecutor};
pub use plugins::{Plugin, PluginRegistry};
pub use scheduler::Scheduler;
pub use simulation::{SimulationEngine, SimulationOptions};
pub use storage::{Store, StoreError};

// Re-export commonly used types
pub use types::{
    Alert, AlertStatus, DigitalTwin, ExecutionRecord, ExecutionStatus, JobType, MonitoringJob,
    MonitoringRule, Pipeline, PluginRef, PluginType, ScheduledJob, SimulationRun,
    SimulationScenario, Step, TimeSeriesPoint, TriggeredBy,
};
