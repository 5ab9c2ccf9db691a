//! Execution records: the append-only audit log of pipeline and monitoring runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle of one execution. `Running` is only ever observed while the
/// worker is live; a record read back after process exit in `Running` state
/// is an orphan and gets swept to `Failed` at boot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a single step within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// What initiated an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggeredBy {
    /// Direct API request
    Api,
    /// Fired by the scheduler on behalf of a job
    Schedule { job_id: String },
    /// Manual invocation (CLI, tests)
    Manual,
}

// ============================================================================
// Records
// ============================================================================

/// Result of one step, kept inside the parent execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub plugin_ref: String,
    pub status: StepStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Append-only audit entry for a single pipeline or monitoring run.
///
/// Immutable once finished; while `Running`, only `status`, `end`,
/// `duration_ms` and `error` may still change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    /// Owning scheduled job, if any
    #[serde(default)]
    pub job_id: Option<String>,
    /// Pipeline name or monitoring job name that was run
    pub pipeline_ref: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub per_step_results: Vec<StepResult>,
    /// Shared context as it stood when the run ended
    #[serde(default)]
    pub final_context: serde_json::Value,
    pub triggered_by: TriggeredBy,
}

impl ExecutionRecord {
    /// Fresh `Running` record for a run that is about to start.
    pub fn started(
        pipeline_ref: impl Into<String>,
        job_id: Option<String>,
        triggered_by: TriggeredBy,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id,
            pipeline_ref: pipeline_ref.into(),
            start: Utc::now(),
            end: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            error: None,
            per_step_results: Vec::new(),
            final_context: serde_json::Value::Object(serde_json::Map::new()),
            triggered_by,
        }
    }

    /// Stamp the terminal status, end time and duration.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        let end = Utc::now();
        self.duration_ms = Some((end - self.start).num_milliseconds().max(0) as u64);
        self.end = Some(end);
        self.status = status;
        self.error = error;
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Aggregate view over the execution log, served by `/jobs/statistics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean duration over finished runs, milliseconds
    pub average_duration_ms: f64,
}
