//! Scheduled jobs: persistent intent to run a pipeline or monitoring task on a cron

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a scheduled job dispatches when it fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// `target_ref` names a stored pipeline definition
    Pipeline,
    /// `target_ref` names a monitoring job configuration
    Monitoring,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Pipeline => write!(f, "pipeline"),
            JobType::Monitoring => write!(f, "monitoring"),
        }
    }
}

/// Outcome of the most recent firing, kept on the job itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Succeeded,
    Failed,
}

/// A persistent scheduled job. Survives restarts; deleted only on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    /// Pipeline name or monitoring job id, per `job_type`
    pub target_ref: String,
    /// Five-field cron expression (minute hour dom month dow)
    pub cron_expr: String,
    /// IANA timezone name; UTC when absent
    #[serde(default)]
    pub timezone: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<JobRunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// New enabled job with a fresh id and no run history.
    pub fn new(
        name: impl Into<String>,
        job_type: JobType,
        target_ref: impl Into<String>,
        cron_expr: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            job_type,
            target_ref: target_ref.into(),
            cron_expr: cron_expr.into(),
            timezone: None,
            enabled: true,
            next_run: None,
            last_run: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        }
    }
}
