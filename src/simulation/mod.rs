//! Discrete-Event Simulation Engine
//!
//! Steps a digital twin through a scenario's scheduled events:
//!
//! ```text
//! per step:
//!   1. apply events due at this step
//!   2. enqueue propagated events along outgoing relationships
//!      (magnitude × strength × factor, chain stops below significance)
//!   3. evolve every entity one tick (damping drift or ML prediction)
//!   4. snapshot every `snapshot_interval` steps
//! ```
//!
//! Terminates on step budget, dead state (nothing active, nothing queued)
//! or cancellation. Metrics are NaN-sanitized before the run is returned —
//! the JSON envelope downstream cannot represent NaN.

mod engine;
mod metrics;

pub use engine::{SimulationEngine, SimulationOptions};
pub use metrics::analyze_impact;
