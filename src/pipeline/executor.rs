//! Sequential pipeline executor

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{resolve_templates, PipelineContext};
use crate::error::CoreError;
use crate::plugins::PluginRegistry;
use crate::storage::Store;
use crate::types::{
    ExecutionRecord, ExecutionStatus, Pipeline, Step, StepResult, StepStatus, TriggeredBy,
};

/// Per-run options beyond the pipeline itself.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub triggered_by: TriggeredBy,
    /// Owning scheduled job, recorded on the execution
    pub job_id: Option<String>,
    /// Whole-run budget; `None` means only per-step timeouts apply
    pub max_duration: Option<Duration>,
}

impl ExecutionOptions {
    pub fn api() -> Self {
        Self {
            triggered_by: TriggeredBy::Api,
            job_id: None,
            max_duration: None,
        }
    }

    pub fn scheduled(job_id: impl Into<String>, max_duration: Duration) -> Self {
        let job_id = job_id.into();
        Self {
            triggered_by: TriggeredBy::Schedule {
                job_id: job_id.clone(),
            },
            job_id: Some(job_id),
            max_duration: Some(max_duration),
        }
    }
}

/// Runs pipelines against the plugin registry and records every run.
pub struct PipelineExecutor {
    registry: Arc<PluginRegistry>,
    store: Arc<Store>,
    default_step_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        store: Arc<Store>,
        default_step_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            default_step_timeout,
        }
    }

    /// Execute `pipeline` with a fresh context seeded from `initial`.
    ///
    /// Always returns a finished record, never one still `Running`.
    /// The `Running` row is persisted before the first step so a crash
    /// mid-run leaves an orphan for the boot sweep; persistence failures on
    /// the record itself are logged, not fatal — the run already happened.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        pipeline: &Pipeline,
        initial: &Value,
        options: ExecutionOptions,
    ) -> ExecutionRecord {
        let mut record = ExecutionRecord::started(
            pipeline.name.clone(),
            options.job_id.clone(),
            options.triggered_by.clone(),
        );
        if let Err(e) = self.store.append_execution(&record) {
            warn!(execution = %record.id, error = %e, "Could not persist running execution");
        }

        let deadline = options.max_duration.map(|d| Instant::now() + d);
        let mut ctx = PipelineContext::seeded(initial);

        info!(
            pipeline = %pipeline.name,
            execution = %record.id,
            steps = pipeline.steps.len(),
            "Pipeline execution started"
        );

        let mut outcome: Result<(), CoreError> = Ok(());
        for (index, step) in pipeline.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome = Err(CoreError::Cancelled);
                break;
            }

            let step_started = Instant::now();
            let result = self.run_step(cancel, step, &mut ctx, deadline).await;
            let duration_ms = step_started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    debug!(pipeline = %pipeline.name, step = %step.name, duration_ms, "Step succeeded");
                    record.per_step_results.push(StepResult {
                        index,
                        name: step.name.clone(),
                        plugin_ref: step.plugin_ref.to_string(),
                        status: StepStatus::Succeeded,
                        error: None,
                        duration_ms,
                    });
                }
                Err(e) => {
                    warn!(
                        pipeline = %pipeline.name,
                        step = %step.name,
                        error = %e,
                        "Step failed — skipping remaining steps"
                    );
                    record.per_step_results.push(StepResult {
                        index,
                        name: step.name.clone(),
                        plugin_ref: step.plugin_ref.to_string(),
                        status: StepStatus::Failed,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    outcome = Err(e);
                    break;
                }
            }
        }

        record.final_context = ctx.to_value();
        match outcome {
            Ok(()) => record.finish(ExecutionStatus::Succeeded, None),
            Err(CoreError::Cancelled) => {
                record.finish(ExecutionStatus::Cancelled, Some("cancelled".to_string()))
            }
            Err(e) => record.finish(ExecutionStatus::Failed, Some(e.to_string())),
        }

        if let Err(e) = self.store.finish_execution(&record) {
            warn!(execution = %record.id, error = %e, "Could not persist finished execution");
        }

        info!(
            pipeline = %pipeline.name,
            execution = %record.id,
            status = %record.status,
            duration_ms = record.duration_ms.unwrap_or(0),
            "Pipeline execution finished"
        );
        record
    }

    async fn run_step(
        &self,
        cancel: &CancellationToken,
        step: &Step,
        ctx: &mut PipelineContext,
        deadline: Option<Instant>,
    ) -> Result<(), CoreError> {
        // Declared inputs must already be in the context.
        for input in &step.inputs {
            if !ctx.contains(input) {
                return Err(CoreError::UnresolvedReference {
                    step: step.name.clone(),
                    reference: input.clone(),
                });
            }
        }

        let mut resolved = resolve_templates(&step.config, ctx, &step.name)?;

        // `timeout_secs` is an executor concern, not a plugin config field:
        // pop it before schema validation so strict schemas never see it.
        let timeout_override = resolved
            .as_object_mut()
            .and_then(|map| map.remove("timeout_secs"))
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs);

        let plugin = self.registry.lookup(&step.plugin_ref)?;
        self.registry.validate(&step.plugin_ref, &resolved)?;

        // Hand the step's output key to the plugin through its config.
        let config = match (&step.output_key, resolved) {
            (Some(key), Value::Object(mut map)) => {
                map.insert("output_key".to_string(), Value::String(key.clone()));
                Value::Object(map)
            }
            (_, other) => other,
        };

        let step_timeout = self.step_timeout(timeout_override, deadline)?;
        let execution = plugin.execute(cancel, &config, ctx);
        match tokio::time::timeout(step_timeout, execution).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(if cancel.is_cancelled() {
                    CoreError::Cancelled
                } else {
                    CoreError::Timeout(step_timeout)
                })
            }
        }

        if let Some(key) = &step.output_key {
            if !ctx.contains(key) {
                return Err(CoreError::plugin_failure(
                    step.plugin_ref.to_string(),
                    format!("plugin did not write output key '{key}'"),
                ));
            }
        }
        Ok(())
    }

    /// Effective timeout for one step: the config's `timeout_secs` override
    /// or the default, further capped by the remaining whole-run budget.
    fn step_timeout(
        &self,
        timeout_override: Option<Duration>,
        deadline: Option<Instant>,
    ) -> Result<Duration, CoreError> {
        let mut timeout = timeout_override.unwrap_or(self.default_step_timeout);
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::Timeout(Duration::ZERO));
            }
            timeout = timeout.min(remaining);
        }
        Ok(timeout)
    }
}
