//! API Regression Tests
//!
//! Drives the REST façade with `tower::ServiceExt::oneshot` and asserts on
//! the envelope shape, status codes, and the full twin → scenario → run →
//! timeline flow.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mimir_aip::api::{create_app, ApiState};
use mimir_aip::config::{SchedulerConfig, SimulationConfig};
use mimir_aip::monitoring::MonitoringExecutor;
use mimir_aip::pipeline::PipelineExecutor;
use mimir_aip::plugins::{register_builtins, PluginRegistry};
use mimir_aip::scheduler::Scheduler;
use mimir_aip::storage::Store;

struct TestApp {
    _dir: tempfile::TempDir,
    app: Router,
}

fn build_app(with_scheduler: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db")).unwrap();
    let registry = Arc::new(PluginRegistry::new());
    register_builtins(&registry).unwrap();
    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        Duration::from_secs(30),
    ));
    let monitoring = Arc::new(MonitoringExecutor::new(Arc::clone(&store)));
    let scheduler = with_scheduler.then(|| {
        Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::clone(&monitoring),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
    });

    let state = ApiState {
        store,
        registry,
        executor,
        monitoring,
        scheduler,
        simulation: SimulationConfig::default(),
        llm: None,
        cancel: CancellationToken::new(),
    };
    TestApp {
        _dir: dir,
        app: create_app(state),
    }
}

async fn request(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn envelope_shape_on_success_and_error() {
    let test = build_app(false);

    let (status, body) = request(&test.app, Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["data"]["status"].is_string());
    assert!(body["executed_at"].is_string());

    let (status, body) = request(&test.app, Method::GET, "/api/v1/jobs/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn inline_pipeline_execution() {
    let test = build_app(false);

    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/pipelines/execute",
        Some(json!({
            "pipeline": {
                "name": "inline_sleep",
                "steps": [{
                    "name": "nap",
                    "plugin_ref": "Data_Processing.sleep",
                    "config": {"duration_ms": 1},
                    "output_key": "slept"
                }]
            },
            "context": {"seed": 1}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "succeeded");
    assert_eq!(body["data"]["final_context"]["seed"], 1);
    assert!(body["data"]["final_context"]["slept"].is_object());

    // neither name nor inline definition is a 400
    let (status, _) = request(
        &test.app,
        Method::POST,
        "/api/v1/pipelines/execute",
        Some(json!({"context": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scheduler_job_crud_over_http() {
    let test = build_app(true);

    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/scheduler/jobs",
        Some(json!({
            "name": "nightly",
            "job_type": "pipeline",
            "target_ref": "ingest",
            "cron_expr": "0 2 * * *"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    assert!(body["data"]["next_run"].is_string());

    let (status, body) = request(
        &test.app,
        Method::GET,
        &format!("/api/v1/scheduler/jobs/{job_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, body) = request(
        &test.app,
        Method::POST,
        &format!("/api/v1/scheduler/jobs/{job_id}/disable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert!(body["data"]["next_run"].is_null());

    let (status, _) = request(
        &test.app,
        Method::DELETE,
        &format!("/api/v1/scheduler/jobs/{job_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &test.app,
        Method::GET,
        &format!("/api/v1/scheduler/jobs/{job_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // malformed cron is rejected with a validation error
    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/scheduler/jobs",
        Some(json!({
            "name": "broken",
            "job_type": "pipeline",
            "target_ref": "x",
            "cron_expr": "every day at noon"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn monitoring_rules_and_alert_lifecycle_over_http() {
    let test = build_app(false);

    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/monitoring/rules",
        Some(json!({
            "ontology_id": "onto-1",
            "metric_name": "stock",
            "rule_type": "threshold",
            "condition": {"op": "<", "value": 5.0},
            "severity": "high"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["rule_type"], "threshold");

    let now = chrono::Utc::now().to_rfc3339();
    let (status, _) = request(
        &test.app,
        Method::POST,
        "/api/v1/monitoring/timeseries",
        Some(json!({
            "points": [{
                "entity_id": "E1",
                "metric_name": "stock",
                "timestamp": now,
                "value": 3.0
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // no alerts yet: evaluation happens through a monitoring job, not ingest
    let (status, body) = request(&test.app, Method::GET, "/api/v1/monitoring/alerts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn twin_scenario_run_timeline_flow() {
    let test = build_app(false);

    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/twins",
        Some(json!({
            "ontology_id": "supply-onto",
            "name": "plant",
            "model_type": "supply_chain",
            "entities": [
                {"uri": "urn:A", "entity_type": "site", "label": "A"},
                {"uri": "urn:B", "entity_type": "site", "label": "B"}
            ],
            "relationships": [
                {"id": "r1", "source_uri": "urn:A", "target_uri": "urn:B",
                 "predicate": "supplies", "strength": 0.8}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let twin_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &test.app,
        Method::POST,
        &format!("/api/v1/twins/{twin_id}/scenarios"),
        Some(json!({
            "name": "outage",
            "scenario_type": "custom",
            "duration_steps": 10,
            "events": [{
                "step": 2,
                "target_uri": "urn:A",
                "kind": "entity_unavailable",
                "propagation": {"factor": 0.7, "delay_steps": 1}
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let scenario_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &test.app,
        Method::POST,
        &format!("/api/v1/twins/{twin_id}/scenarios/{scenario_id}/run"),
        Some(json!({"snapshot_interval": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let run = &body["data"];
    assert_eq!(run["status"], "completed");
    assert_eq!(run["twin_id"], twin_id.as_str());
    assert!(run["metrics"]["system_stability"].is_f64());
    let run_id = run["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &test.app,
        Method::GET,
        &format!("/api/v1/simulations/runs/{run_id}/timeline"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 5);

    let (status, body) = request(
        &test.app,
        Method::GET,
        &format!("/api/v1/simulations/runs/{run_id}/impact"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["most_affected"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "urn:A"));

    // cascade delete through the twin
    let (status, _) = request(
        &test.app,
        Method::DELETE,
        &format!("/api/v1/twins/{twin_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &test.app,
        Method::GET,
        &format!("/api/v1/simulations/runs/{run_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn twin_validation_rejects_dangling_relationship() {
    let test = build_app(false);

    let (status, body) = request(
        &test.app,
        Method::POST,
        "/api/v1/twins",
        Some(json!({
            "ontology_id": "onto",
            "name": "broken",
            "model_type": "supply_chain",
            "entities": [{"uri": "urn:A", "entity_type": "site", "label": "A"}],
            "relationships": [
                {"id": "r1", "source_uri": "urn:A", "target_uri": "urn:missing",
                 "predicate": "supplies", "strength": 0.5}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}
