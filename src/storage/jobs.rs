//! Scheduled-job table
//!
//! Keyed by job id. Every scheduler mutation persists through here before it
//! becomes visible in memory.

use chrono::{DateTime, Utc};

use super::{Store, StoreError};
use crate::types::{JobRunStatus, ScheduledJob};

impl Store {
    pub fn save_job(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        Self::put(&self.jobs, job.id.as_bytes(), job)
    }

    pub fn load_job(&self, id: &str) -> Result<Option<ScheduledJob>, StoreError> {
        Self::get(&self.jobs, id.as_bytes())
    }

    pub fn load_all_jobs(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        Self::scan(&self.jobs)
    }

    /// The recovery set: every enabled job, regardless of `next_run` staleness.
    pub fn load_enabled_jobs(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        Ok(Self::scan::<ScheduledJob>(&self.jobs)?
            .into_iter()
            .filter(|j| j.enabled)
            .collect())
    }

    pub fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        self.jobs
            .remove(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        Ok(())
    }

    /// Post-execution state write: last run, outcome, and the recomputed
    /// `next_run`, in one committed update.
    pub fn update_job_execution(
        &self,
        job_id: &str,
        status: JobRunStatus,
        ran_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<ScheduledJob, StoreError> {
        let mut job = self
            .load_job(job_id)?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        job.last_run = Some(ran_at);
        job.last_status = Some(status);
        job.next_run = next_run;
        job.updated_at = Utc::now();
        self.save_job(&job)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobType;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, store) = open_temp();
        let job = ScheduledJob::new("nightly", JobType::Pipeline, "ingest", "0 2 * * *");
        store.save_job(&job).unwrap();

        let loaded = store.load_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.name, "nightly");
        assert_eq!(loaded.cron_expr, "0 2 * * *");
    }

    #[test]
    fn test_enabled_filter() {
        let (_dir, store) = open_temp();
        let enabled = ScheduledJob::new("on", JobType::Pipeline, "p", "* * * * *");
        let mut disabled = ScheduledJob::new("off", JobType::Pipeline, "p", "* * * * *");
        disabled.enabled = false;
        store.save_job(&enabled).unwrap();
        store.save_job(&disabled).unwrap();

        let jobs = store.load_enabled_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "on");
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let (_dir, store) = open_temp();
        match store.delete_job("nope") {
            Err(StoreError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_update_job_execution_writes_state() {
        let (_dir, store) = open_temp();
        let job = ScheduledJob::new("j", JobType::Monitoring, "mon", "*/5 * * * *");
        store.save_job(&job).unwrap();

        let ran_at = Utc::now();
        let next = ran_at + chrono::Duration::minutes(5);
        let updated = store
            .update_job_execution(&job.id, JobRunStatus::Failed, ran_at, Some(next))
            .unwrap();
        assert_eq!(updated.last_status, Some(JobRunStatus::Failed));
        assert_eq!(updated.next_run, Some(next));

        let reloaded = store.load_job(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.last_status, Some(JobRunStatus::Failed));
    }
}
