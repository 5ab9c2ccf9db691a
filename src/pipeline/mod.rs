//! Pipeline Execution
//!
//! Turns a declarative [`Pipeline`](crate::types::Pipeline) into an
//! [`ExecutionRecord`](crate::types::ExecutionRecord):
//!
//! ```text
//! for each step, in declared order:
//!   1. declared inputs present in the context?
//!   2. resolve {{template}} references in the step config
//!   3. registry validation (schema + plugin checks)
//!   4. plugin execute, bounded by timeout and cancellation
//!   5. output key written?
//! any failure short-circuits; the record carries the failing step's error
//! ```
//!
//! Steps are strictly sequential within one run; concurrent runs of the
//! same pipeline are independent (each gets a fresh context).

mod executor;

pub use executor::{ExecutionOptions, PipelineExecutor};
