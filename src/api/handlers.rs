//! API route handlers
//!
//! Thin translation layer: deserialize the request, call the owning core
//! component, wrap the result in the envelope. No business logic lives here.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::SimulationConfig;
use crate::error::CoreError;
use crate::llm::LlmClient;
use crate::monitoring::MonitoringExecutor;
use crate::pipeline::{ExecutionOptions, PipelineExecutor};
use crate::plugins::PluginRegistry;
use crate::scheduler::Scheduler;
use crate::simulation::{analyze_impact, SimulationEngine, SimulationOptions};
use crate::storage::Store;
use crate::types::{
    AlertStatus, AnalysisType, DigitalTwin, JobType, MonitoringJob, MonitoringRule, Pipeline,
    RuleCondition, ScenarioType, ScheduledJob, Severity, SimulationEvent, SimulationScenario,
    TimeSeriesPoint,
};

// ============================================================================
// API State
// ============================================================================

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub registry: Arc<PluginRegistry>,
    pub executor: Arc<PipelineExecutor>,
    pub monitoring: Arc<MonitoringExecutor>,
    /// Absent when `scheduler.enabled = false`
    pub scheduler: Option<Arc<Scheduler>>,
    pub simulation: SimulationConfig,
    pub llm: Option<Arc<dyn LlmClient>>,
    /// App-level token; cancelled on shutdown and forwarded into every run
    pub cancel: CancellationToken,
}

impl ApiState {
    fn scheduler_or_unavailable(&self) -> Result<&Arc<Scheduler>, Response> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| ApiErrorResponse::service_unavailable("scheduler is disabled"))
    }
}

// ============================================================================
// Health & Plugins
// ============================================================================

pub async fn get_health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "scheduler_enabled": state.scheduler.is_some(),
        "plugins_registered": state.registry.list().len(),
        "store_size_bytes": state.store.size_on_disk(),
    }))
}

pub async fn list_plugins(State(state): State<ApiState>) -> Response {
    let refs: Vec<String> = state.registry.list().iter().map(ToString::to_string).collect();
    ApiResponse::ok(refs)
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecutePipelineRequest {
    #[serde(default)]
    pub pipeline_name: Option<String>,
    /// Inline definition, for one-off runs
    #[serde(default)]
    pub pipeline: Option<Pipeline>,
    #[serde(default)]
    pub context: serde_json::Value,
}

pub async fn execute_pipeline(
    State(state): State<ApiState>,
    Json(req): Json<ExecutePipelineRequest>,
) -> Response {
    let pipeline = match (&req.pipeline_name, req.pipeline) {
        (Some(name), _) => match state.store.load_pipeline(name) {
            Ok(Some(p)) => p,
            Ok(None) => return ApiErrorResponse::not_found(format!("pipeline '{name}'")),
            Err(e) => return ApiErrorResponse::from_core(&e.into()),
        },
        (None, Some(inline)) => inline,
        (None, None) => {
            return ApiErrorResponse::bad_request("provide pipeline_name or an inline pipeline")
        }
    };

    let record = state
        .executor
        .execute(&state.cancel, &pipeline, &req.context, ExecutionOptions::api())
        .await;
    ApiResponse::ok(record)
}

pub async fn create_pipeline(
    State(state): State<ApiState>,
    Json(pipeline): Json<Pipeline>,
) -> Response {
    if pipeline.name.trim().is_empty() {
        return ApiErrorResponse::bad_request("pipeline name must not be empty");
    }
    match state.store.save_pipeline(&pipeline) {
        Ok(()) => ApiResponse::created(pipeline),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn list_pipelines(State(state): State<ApiState>) -> Response {
    match state.store.list_pipelines() {
        Ok(pipelines) => ApiResponse::ok(pipelines),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

// ============================================================================
// Scheduler Jobs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub job_type: JobType,
    pub target_ref: String,
    pub cron_expr: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateJobRequest>,
) -> Response {
    let scheduler = match state.scheduler_or_unavailable() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let mut job = ScheduledJob::new(req.name, req.job_type, req.target_ref, req.cron_expr);
    job.timezone = req.timezone;
    job.enabled = req.enabled;
    match scheduler.add_job(job).await {
        Ok(job) => ApiResponse::created(job),
        Err(e) => ApiErrorResponse::from_core(&e),
    }
}

pub async fn list_jobs(State(state): State<ApiState>) -> Response {
    match state.scheduler_or_unavailable() {
        Ok(scheduler) => ApiResponse::ok(scheduler.list_jobs().await),
        Err(resp) => resp,
    }
}

pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let scheduler = match state.scheduler_or_unavailable() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match scheduler.get_job(&id).await {
        Some(job) => ApiResponse::ok(job),
        None => ApiErrorResponse::not_found(format!("job '{id}'")),
    }
}

pub async fn delete_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let scheduler = match state.scheduler_or_unavailable() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match scheduler.delete_job(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({"deleted": id})),
        Err(e) => ApiErrorResponse::from_core(&e),
    }
}

pub async fn enable_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    set_job_enabled(state, id, true).await
}

pub async fn disable_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    set_job_enabled(state, id, false).await
}

async fn set_job_enabled(state: ApiState, id: String, enabled: bool) -> Response {
    let scheduler = match state.scheduler_or_unavailable() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match scheduler.set_enabled(&id, enabled).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => ApiErrorResponse::from_core(&e),
    }
}

// ============================================================================
// Execution History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_executions(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.store.recent_executions(query.limit) {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn get_execution(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.load_execution(&id) {
        Ok(Some(record)) => ApiResponse::ok(record),
        Ok(None) => ApiErrorResponse::not_found(format!("execution '{id}'")),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn running_executions(State(state): State<ApiState>) -> Response {
    match state.store.running_executions() {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn execution_statistics(State(state): State<ApiState>) -> Response {
    match state.store.execution_statistics() {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub ontology_id: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub metric_name: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub async fn create_rule(
    State(state): State<ApiState>,
    Json(req): Json<CreateRuleRequest>,
) -> Response {
    let mut rule = MonitoringRule::new(req.ontology_id, req.metric_name, req.condition, req.severity);
    rule.entity_id = req.entity_id;
    rule.enabled = req.enabled;
    match state.store.save_rule(&rule) {
        Ok(()) => ApiResponse::created(rule),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn list_rules(State(state): State<ApiState>) -> Response {
    match state.store.list_rules() {
        Ok(rules) => ApiResponse::ok(rules),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMonitoringJobRequest {
    pub name: String,
    pub ontology_id: String,
    pub cron_expr: String,
    #[serde(default)]
    pub analysis_types: Vec<AnalysisType>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub async fn create_monitoring_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateMonitoringJobRequest>,
) -> Response {
    let mut job = MonitoringJob::new(req.name, req.ontology_id, req.cron_expr);
    job.analysis_types = req.analysis_types;
    job.enabled = req.enabled;
    match state.store.save_monitoring_job(&job) {
        Ok(()) => ApiResponse::created(job),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestPointsRequest {
    pub points: Vec<TimeSeriesPoint>,
}

pub async fn ingest_timeseries(
    State(state): State<ApiState>,
    Json(req): Json<IngestPointsRequest>,
) -> Response {
    match state.store.append_points(&req.points) {
        Ok(()) => ApiResponse::created(serde_json::json!({"ingested": req.points.len()})),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub status: Option<AlertStatus>,
}

pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    match state.store.list_alerts(query.status) {
        Ok(alerts) => ApiResponse::ok(alerts),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn acknowledge_alert(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    transition_alert(state, id, AlertStatus::Acknowledged)
}

pub async fn resolve_alert(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    transition_alert(state, id, AlertStatus::Resolved)
}

fn transition_alert(state: ApiState, id: String, status: AlertStatus) -> Response {
    match state.store.set_alert_status(&id, status) {
        Ok(alert) => ApiResponse::ok(alert),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

// ============================================================================
// Digital Twins & Simulation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTwinRequest {
    pub ontology_id: String,
    pub name: String,
    pub model_type: String,
    #[serde(default)]
    pub base_state: serde_json::Value,
    #[serde(default)]
    pub entities: Vec<crate::types::TwinEntity>,
    #[serde(default)]
    pub relationships: Vec<crate::types::TwinRelationship>,
}

pub async fn create_twin(
    State(state): State<ApiState>,
    Json(req): Json<CreateTwinRequest>,
) -> Response {
    let mut twin = DigitalTwin::new(req.ontology_id, req.name, req.model_type);
    twin.base_state = req.base_state;
    twin.entities = req.entities;
    twin.relationships = req.relationships;
    if let Err(reason) = twin.validate() {
        return ApiErrorResponse::from_core(&CoreError::Validation(reason));
    }
    match state.store.save_twin(&twin) {
        Ok(()) => ApiResponse::created(twin),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn list_twins(State(state): State<ApiState>) -> Response {
    match state.store.list_twins() {
        Ok(twins) => ApiResponse::ok(twins),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn get_twin(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.load_twin(&id) {
        Ok(Some(twin)) => ApiResponse::ok(twin),
        Ok(None) => ApiErrorResponse::not_found(format!("twin '{id}'")),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn delete_twin(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.delete_twin(&id) {
        Ok(()) => ApiResponse::ok(serde_json::json!({"deleted": id})),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScenarioRequest {
    pub name: String,
    pub scenario_type: ScenarioType,
    pub duration_steps: u64,
    #[serde(default)]
    pub events: Vec<SimulationEvent>,
}

pub async fn create_scenario(
    State(state): State<ApiState>,
    Path(twin_id): Path<String>,
    Json(req): Json<CreateScenarioRequest>,
) -> Response {
    match state.store.load_twin(&twin_id) {
        Ok(Some(_)) => {}
        Ok(None) => return ApiErrorResponse::not_found(format!("twin '{twin_id}'")),
        Err(e) => return ApiErrorResponse::from_core(&e.into()),
    }
    let mut scenario =
        SimulationScenario::new(twin_id, req.name, req.scenario_type, req.duration_steps);
    scenario.events = req.events;
    match state.store.save_scenario(&scenario) {
        Ok(()) => ApiResponse::created(scenario),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunScenarioRequest {
    #[serde(default)]
    pub max_steps: Option<u64>,
    #[serde(default)]
    pub snapshot_interval: Option<u64>,
}

pub async fn run_scenario(
    State(state): State<ApiState>,
    Path((twin_id, scenario_id)): Path<(String, String)>,
    body: Option<Json<RunScenarioRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let twin = match state.store.load_twin(&twin_id) {
        Ok(Some(twin)) => twin,
        Ok(None) => return ApiErrorResponse::not_found(format!("twin '{twin_id}'")),
        Err(e) => return ApiErrorResponse::from_core(&e.into()),
    };
    let scenario = match state.store.load_scenario(&scenario_id) {
        Ok(Some(s)) if s.twin_id == twin_id => s,
        Ok(_) => {
            return ApiErrorResponse::not_found(format!(
                "scenario '{scenario_id}' for twin '{twin_id}'"
            ))
        }
        Err(e) => return ApiErrorResponse::from_core(&e.into()),
    };

    let options = SimulationOptions {
        max_steps: req.max_steps.unwrap_or(state.simulation.default_max_steps),
        snapshot_interval: req
            .snapshot_interval
            .unwrap_or(state.simulation.default_snapshot_interval),
    };
    let engine =
        SimulationEngine::with_store_selection(&state.store, twin, options, state.llm.clone());
    let run = engine.run(&state.cancel, &scenario).await;

    if let Err(e) = state.store.save_simulation_run(&run) {
        return ApiErrorResponse::from_core(&e.into());
    }
    ApiResponse::ok(run)
}

pub async fn get_simulation_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Response {
    match state.store.load_simulation_run(&run_id) {
        Ok(Some(run)) => ApiResponse::ok(run),
        Ok(None) => ApiErrorResponse::not_found(format!("simulation run '{run_id}'")),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn get_simulation_timeline(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Response {
    match state.store.snapshots_for_run(&run_id) {
        Ok(snapshots) if !snapshots.is_empty() => ApiResponse::ok(snapshots),
        Ok(_) => match state.store.load_simulation_run(&run_id) {
            // a run can legitimately have zero snapshots (short duration)
            Ok(Some(_)) => ApiResponse::ok(Vec::<crate::types::SimulationSnapshot>::new()),
            Ok(None) => ApiErrorResponse::not_found(format!("simulation run '{run_id}'")),
            Err(e) => ApiErrorResponse::from_core(&e.into()),
        },
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}

pub async fn get_simulation_impact(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Response {
    match state.store.load_simulation_run(&run_id) {
        Ok(Some(run)) => ApiResponse::ok(analyze_impact(&run)),
        Ok(None) => ApiErrorResponse::not_found(format!("simulation run '{run_id}'")),
        Err(e) => ApiErrorResponse::from_core(&e.into()),
    }
}
