//! Persistent Cron Scheduler
//!
//! Holds the live job set in memory, fires due jobs on a coarse tick, and
//! persists every mutation before it becomes visible. Survives restarts:
//! `recover` reloads jobs, recomputes stale `next_run` values and sweeps
//! executions orphaned by the previous process — all before the tick loop
//! starts, so a fresh dispatch can never race the sweep.
//!
//! ```text
//! disabled ──enable──▶ scheduled ──tick fires──▶ running ──ok──▶ scheduled
//!      ▲                    │                        │
//!      └────disable─────────┘                        └──err──▶ scheduled (last_status=failed)
//! ```
//!
//! Concurrency discipline: the job map lock is held for mutation+persist
//! pairs, never across an execution. Workers run in parallel behind a
//! semaphore capped at `max_jobs`; when permits run out the remaining due
//! jobs simply wait for the next tick.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::CoreError;
use crate::monitoring::MonitoringExecutor;
use crate::pipeline::{ExecutionOptions, PipelineExecutor};
use crate::storage::Store;
use crate::types::{
    ExecutionRecord, ExecutionStatus, JobRunStatus, JobType, ScheduledJob, TriggeredBy,
};

/// The scheduler. Shared behind an `Arc`; the tick loop and API handlers
/// all talk to the same instance.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    workers: Mutex<JoinSet<()>>,
    store: Arc<Store>,
    pipelines: Arc<PipelineExecutor>,
    monitoring: Arc<MonitoringExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        pipelines: Arc<PipelineExecutor>,
        monitoring: Arc<MonitoringExecutor>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            workers: Mutex::new(JoinSet::new()),
            store,
            pipelines,
            monitoring,
            semaphore: Arc::new(Semaphore::new(config.max_jobs.max(1))),
            cancel,
            config,
        })
    }

    // ------------------------------------------------------------------
    // Job CRUD — persist before the mutation becomes visible
    // ------------------------------------------------------------------

    /// Register a job. Validates the cron expression, computes the first
    /// `next_run`, persists, then publishes to the in-memory map.
    pub async fn add_job(&self, mut job: ScheduledJob) -> Result<ScheduledJob, CoreError> {
        cron::validate(&job.cron_expr, job.timezone.as_deref())?;
        if job.enabled && job.next_run.is_none() {
            job.next_run = Some(cron::next_after(
                &job.cron_expr,
                job.timezone.as_deref(),
                Utc::now(),
            )?);
        }

        let mut jobs = self.jobs.lock().await;
        self.store.save_job(&job)?;
        jobs.insert(job.id.clone(), job.clone());
        info!(job = %job.name, job_id = %job.id, cron = %job.cron_expr, "Job added");
        Ok(job)
    }

    /// Replace a job's definition, keeping its run history fields.
    pub async fn update_job(&self, mut job: ScheduledJob) -> Result<ScheduledJob, CoreError> {
        cron::validate(&job.cron_expr, job.timezone.as_deref())?;
        let mut jobs = self.jobs.lock().await;
        let existing = jobs
            .get(&job.id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("job {}", job.id)))?;
        job.created_at = existing.created_at;
        job.last_run = existing.last_run;
        job.last_status = existing.last_status;
        job.updated_at = Utc::now();
        if job.enabled {
            job.next_run = Some(cron::next_after(
                &job.cron_expr,
                job.timezone.as_deref(),
                Utc::now(),
            )?);
        } else {
            job.next_run = None;
        }

        self.store.save_job(&job)?;
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn delete_job(&self, id: &str) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().await;
        self.store.delete_job(id)?;
        jobs.remove(id);
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Enable or disable. Enabling recomputes `next_run`; disabling clears
    /// it so the state machine lands back in `disabled`.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<ScheduledJob, CoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut job = jobs
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        job.enabled = enabled;
        job.updated_at = Utc::now();
        job.next_run = if enabled {
            Some(cron::next_after(
                &job.cron_expr,
                job.timezone.as_deref(),
                Utc::now(),
            )?)
        } else {
            None
        };

        self.store.save_job(&job)?;
        jobs.insert(job.id.clone(), job.clone());
        info!(job_id = %id, enabled, "Job toggled");
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.lock().await.get(id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Boot-time recovery. Must complete before `run` starts ticking.
    ///
    /// Sweeps orphaned executions, reloads every persisted job, and gives
    /// enabled jobs with a stale or absent `next_run` a fresh one strictly
    /// in the future. A job whose cron no longer parses is disabled rather
    /// than dropped.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let swept = self.store.sweep_orphaned_executions()?;
        if swept > 0 {
            warn!(swept, "Marked orphaned executions failed (orphaned_by_restart)");
        }

        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        for mut job in self.store.load_all_jobs()? {
            if job.enabled && job.next_run.map_or(true, |n| n <= now) {
                match cron::next_after(&job.cron_expr, job.timezone.as_deref(), now) {
                    Ok(next) => {
                        job.next_run = Some(next);
                        job.updated_at = now;
                        self.store.save_job(&job)?;
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Unscheduleable cron on recovery — disabling job");
                        job.enabled = false;
                        job.next_run = None;
                        self.store.save_job(&job)?;
                    }
                }
            }
            jobs.insert(job.id.clone(), job);
        }
        info!(jobs = jobs.len(), swept, "Scheduler recovery complete");
        Ok(swept)
    }

    // ------------------------------------------------------------------
    // Tick loop
    // ------------------------------------------------------------------

    /// Background loop. Runs until the cancellation token fires.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            tick_secs = self.config.tick_interval_secs,
            max_jobs = self.config.max_jobs,
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => Arc::clone(&self).tick().await,
            }
        }
        info!("Scheduler tick loop stopped");
    }

    /// One pass over the job map: dispatch everything due, bounded by the
    /// semaphore. The lock is held only to snapshot and advance jobs —
    /// never across an execution.
    async fn tick(self: Arc<Self>) {
        {
            // reap finished workers so the join set stays bounded
            let mut workers = self.workers.lock().await;
            while workers.try_join_next().is_some() {}
        }

        let now = Utc::now();
        let mut dispatches = Vec::new();
        {
            let mut jobs = self.jobs.lock().await;
            for job in jobs.values_mut() {
                if !job.enabled {
                    continue;
                }
                let Some(next) = job.next_run else { continue };
                if next > now {
                    continue;
                }
                let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                    debug!("max concurrent jobs reached — deferring remaining due jobs");
                    break;
                };

                // advance next_run before dispatch so the job cannot
                // double-fire while its worker is still running
                let previous = job.clone();
                job.next_run =
                    cron::next_after(&job.cron_expr, job.timezone.as_deref(), now).ok();
                job.updated_at = now;
                if let Err(e) = self.store.save_job(job) {
                    warn!(job_id = %job.id, error = %e, "Persist failed — job deferred to next tick");
                    *job = previous;
                    drop(permit);
                    continue;
                }
                dispatches.push((job.clone(), permit));
            }
        }

        for (job, permit) in dispatches {
            let scheduler = Arc::clone(&self);
            self.workers.lock().await.spawn(async move {
                scheduler.run_job(job).await;
                drop(permit);
            });
        }
    }

    /// Execute one job and write back its post-run state.
    async fn run_job(self: Arc<Self>, job: ScheduledJob) {
        let ran_at = Utc::now();
        info!(job = %job.name, job_id = %job.id, job_type = %job.job_type, "Job dispatched");

        let succeeded = match job.job_type {
            JobType::Pipeline => self.run_pipeline_target(&job).await,
            JobType::Monitoring => self.run_monitoring_target(&job).await,
        };

        let status = if succeeded {
            JobRunStatus::Succeeded
        } else {
            JobRunStatus::Failed
        };
        let next_run = cron::next_after(&job.cron_expr, job.timezone.as_deref(), Utc::now()).ok();

        let mut jobs = self.jobs.lock().await;
        match self
            .store
            .update_job_execution(&job.id, status, ran_at, next_run)
        {
            Ok(updated) => {
                // the job may have been deleted mid-run; only republish if present
                if jobs.contains_key(&job.id) {
                    jobs.insert(job.id.clone(), updated);
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not persist job state after execution");
            }
        }
    }

    async fn run_pipeline_target(&self, job: &ScheduledJob) -> bool {
        match self.store.load_pipeline(&job.target_ref) {
            Ok(Some(pipeline)) => {
                let options =
                    ExecutionOptions::scheduled(&job.id, self.config.max_execution_time());
                let record = self
                    .pipelines
                    .execute(&self.cancel, &pipeline, &serde_json::json!({}), options)
                    .await;
                record.status == ExecutionStatus::Succeeded
            }
            Ok(None) => {
                self.record_failed_dispatch(
                    job,
                    &format!("pipeline '{}' not found", job.target_ref),
                );
                false
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not load pipeline — storage unavailable");
                false
            }
        }
    }

    async fn run_monitoring_target(&self, job: &ScheduledJob) -> bool {
        let mut record = ExecutionRecord::started(
            job.target_ref.clone(),
            Some(job.id.clone()),
            TriggeredBy::Schedule {
                job_id: job.id.clone(),
            },
        );
        if let Err(e) = self.store.append_execution(&record) {
            warn!(execution = %record.id, error = %e, "Could not persist running execution");
        }

        let outcome = match self.store.load_monitoring_job(&job.target_ref) {
            Ok(Some(monitoring_job)) => {
                let budget = self.config.max_execution_time();
                match tokio::time::timeout(
                    budget,
                    self.monitoring.execute(&self.cancel, &monitoring_job),
                )
                .await
                {
                    Ok(Ok(alerts)) => {
                        record.final_context = serde_json::json!({"alerts_fired": alerts.len()});
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(CoreError::Timeout(budget)),
                }
            }
            Ok(None) => Err(CoreError::NotFound(format!(
                "monitoring job '{}'",
                job.target_ref
            ))),
            Err(e) => Err(e.into()),
        };

        let succeeded = match outcome {
            Ok(()) => {
                record.finish(ExecutionStatus::Succeeded, None);
                true
            }
            Err(CoreError::Cancelled) => {
                record.finish(ExecutionStatus::Cancelled, Some("cancelled".to_string()));
                false
            }
            Err(e) => {
                record.finish(ExecutionStatus::Failed, Some(e.to_string()));
                false
            }
        };
        if let Err(e) = self.store.finish_execution(&record) {
            warn!(execution = %record.id, error = %e, "Could not persist finished execution");
        }
        succeeded
    }

    /// Record a dispatch that failed before anything could run (missing
    /// target). The job stays scheduled; the failure is visible in history.
    fn record_failed_dispatch(&self, job: &ScheduledJob, reason: &str) {
        let mut record = ExecutionRecord::started(
            job.target_ref.clone(),
            Some(job.id.clone()),
            TriggeredBy::Schedule {
                job_id: job.id.clone(),
            },
        );
        record.finish(ExecutionStatus::Failed, Some(reason.to_string()));
        if let Err(e) = self.store.append_execution(&record) {
            warn!(job_id = %job.id, error = %e, "Could not record failed dispatch");
        }
        warn!(job_id = %job.id, reason, "Scheduled dispatch failed");
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Graceful shutdown: stop dispatching, wait for in-flight workers up
    /// to the configured grace period, then abort the rest. Persistence
    /// checkpoint and backup are the caller's final steps.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.cancel.cancel();
        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(self.config.shutdown_grace(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown grace elapsed — aborting remaining workers");
            workers.shutdown().await;
        }
        info!("Scheduler stopped");
    }

    /// Wait for every spawned worker to finish. Test aid.
    #[cfg(test)]
    async fn drain_workers(&self) {
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{register_builtins, PluginRegistry};
    use crate::types::Pipeline;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            max_jobs: 2,
            tick_interval_secs: 1,
            max_execution_secs: 30,
            shutdown_grace_secs: 5,
        }
    }

    fn build(config: SchedulerConfig) -> (tempfile::TempDir, Arc<Store>, Arc<Scheduler>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        let registry = Arc::new(PluginRegistry::new());
        register_builtins(&registry).unwrap();
        let pipelines = Arc::new(PipelineExecutor::new(
            registry,
            Arc::clone(&store),
            Duration::from_secs(30),
        ));
        let monitoring = Arc::new(MonitoringExecutor::new(Arc::clone(&store)));
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            pipelines,
            monitoring,
            config,
            CancellationToken::new(),
        );
        (dir, store, scheduler)
    }

    fn sleep_pipeline(store: &Store, name: &str, duration_ms: u64) -> Pipeline {
        let mut pipeline = Pipeline::new(name);
        pipeline.steps.push(crate::types::Step {
            name: "sleep".to_string(),
            plugin_ref: "Data_Processing.sleep".parse().unwrap(),
            config: json!({"duration_ms": duration_ms}),
            inputs: Vec::new(),
            output_key: Some("slept".to_string()),
        });
        store.save_pipeline(&pipeline).unwrap();
        pipeline
    }

    fn due_job(target: &str) -> ScheduledJob {
        let mut job = ScheduledJob::new("due", JobType::Pipeline, target, "*/1 * * * *");
        job.next_run = Some(Utc::now() - chrono::Duration::seconds(5));
        job
    }

    #[tokio::test]
    async fn test_add_job_computes_next_run() {
        let (_dir, store, scheduler) = build(test_config());
        let job = ScheduledJob::new("j", JobType::Pipeline, "p", "*/5 * * * *");
        let added = scheduler.add_job(job).await.unwrap();
        assert!(added.next_run.unwrap() > Utc::now());

        // persisted before returning
        let stored = store.load_job(&added.id).unwrap().unwrap();
        assert_eq!(stored.next_run, added.next_run);
    }

    #[tokio::test]
    async fn test_add_job_rejects_bad_cron() {
        let (_dir, _store, scheduler) = build(test_config());
        let job = ScheduledJob::new("bad", JobType::Pipeline, "p", "not a cron");
        assert!(scheduler.add_job(job).await.is_err());
    }

    #[tokio::test]
    async fn test_update_job_keeps_history_fields() {
        let (_dir, store, scheduler) = build(test_config());
        let added = scheduler
            .add_job(ScheduledJob::new("j", JobType::Pipeline, "p", "*/5 * * * *"))
            .await
            .unwrap();

        let mut edited = added.clone();
        edited.cron_expr = "*/10 * * * *".to_string();
        edited.name = "renamed".to_string();
        let updated = scheduler.update_job(edited).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.created_at, added.created_at);
        assert!(updated.next_run.unwrap() > Utc::now());

        let stored = store.load_job(&added.id).unwrap().unwrap();
        assert_eq!(stored.cron_expr, "*/10 * * * *");

        // updating an unknown job is NotFound
        let ghost = ScheduledJob::new("g", JobType::Pipeline, "p", "*/5 * * * *");
        assert!(scheduler.update_job(ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_disable_clears_next_run() {
        let (_dir, store, scheduler) = build(test_config());
        let added = scheduler
            .add_job(ScheduledJob::new("j", JobType::Pipeline, "p", "*/5 * * * *"))
            .await
            .unwrap();

        let disabled = scheduler.set_enabled(&added.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(disabled.next_run.is_none());
        assert!(!store.load_job(&added.id).unwrap().unwrap().enabled);

        let enabled = scheduler.set_enabled(&added.id, true).await.unwrap();
        assert!(enabled.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_tick_runs_due_pipeline_job() {
        let (_dir, store, scheduler) = build(test_config());
        sleep_pipeline(&store, "quick", 5);
        let added = scheduler.add_job(due_job("quick")).await.unwrap();

        Arc::clone(&scheduler).tick().await;
        scheduler.drain_workers().await;

        let job = scheduler.get_job(&added.id).await.unwrap();
        assert_eq!(job.last_status, Some(JobRunStatus::Succeeded));
        assert!(job.last_run.is_some());
        assert!(job.next_run.unwrap() > Utc::now());

        let stats = store.execution_statistics().unwrap();
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_missing_pipeline_records_failure_but_keeps_job() {
        let (_dir, store, scheduler) = build(test_config());
        let added = scheduler.add_job(due_job("ghost")).await.unwrap();

        Arc::clone(&scheduler).tick().await;
        scheduler.drain_workers().await;

        let job = scheduler.get_job(&added.id).await.unwrap();
        assert_eq!(job.last_status, Some(JobRunStatus::Failed));
        assert!(job.enabled);

        let recent = store.recent_executions(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ExecutionStatus::Failed);
        assert!(recent[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("not found"));
    }

    #[tokio::test]
    async fn test_semaphore_caps_concurrency() {
        let mut config = test_config();
        config.max_jobs = 1;
        let (_dir, store, scheduler) = build(config);
        sleep_pipeline(&store, "slow", 300);
        scheduler.add_job(due_job("slow")).await.unwrap();
        scheduler.add_job(due_job("slow")).await.unwrap();

        Arc::clone(&scheduler).tick().await;
        // one permit, so exactly one dispatch happened
        assert_eq!(scheduler.semaphore.available_permits(), 0);

        scheduler.drain_workers().await;
        assert_eq!(scheduler.semaphore.available_permits(), 1);

        // the deferred job is still due and fires on the next tick
        Arc::clone(&scheduler).tick().await;
        scheduler.drain_workers().await;
        let ran: usize = scheduler
            .list_jobs()
            .await
            .iter()
            .filter(|j| j.last_run.is_some())
            .count();
        assert_eq!(ran, 2);
    }

    #[tokio::test]
    async fn test_recover_recomputes_stale_next_run() {
        let (_dir, store, scheduler) = build(test_config());
        let mut job = ScheduledJob::new("stale", JobType::Pipeline, "p", "*/5 * * * *");
        job.next_run = Some(Utc::now() - chrono::Duration::hours(2));
        store.save_job(&job).unwrap();

        scheduler.recover().await.unwrap();
        let recovered = scheduler.get_job(&job.id).await.unwrap();
        assert!(recovered.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_recover_sweeps_orphans() {
        let (_dir, store, scheduler) = build(test_config());
        let orphan = ExecutionRecord::started("p", Some("J1".to_string()), TriggeredBy::Api);
        store.append_execution(&orphan).unwrap();

        let swept = scheduler.recover().await.unwrap();
        assert_eq!(swept, 1);
        let record = store.load_execution(&orphan.id).unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("orphaned_by_restart"));
    }
}
