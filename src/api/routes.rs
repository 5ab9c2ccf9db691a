//! API route definitions
//!
//! REST façade over the execution core:
//! - /api/v1/pipelines       - definitions and direct execution
//! - /api/v1/scheduler/jobs  - scheduled job management
//! - /api/v1/jobs            - execution history
//! - /api/v1/monitoring      - rules, time series, alerts
//! - /api/v1/twins           - digital twins, scenarios, simulation runs

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, ApiState};

/// All versioned API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/plugins", get(handlers::list_plugins))
        // Pipelines
        .route("/pipelines", get(handlers::list_pipelines))
        .route("/pipelines", post(handlers::create_pipeline))
        .route("/pipelines/execute", post(handlers::execute_pipeline))
        // Scheduler
        .route("/scheduler/jobs", get(handlers::list_jobs))
        .route("/scheduler/jobs", post(handlers::create_job))
        .route("/scheduler/jobs/:id", get(handlers::get_job))
        .route("/scheduler/jobs/:id", delete(handlers::delete_job))
        .route("/scheduler/jobs/:id/enable", post(handlers::enable_job))
        .route("/scheduler/jobs/:id/disable", post(handlers::disable_job))
        // Execution history
        .route("/jobs", get(handlers::list_executions))
        .route("/jobs/running", get(handlers::running_executions))
        .route("/jobs/recent", get(handlers::list_executions))
        .route("/jobs/statistics", get(handlers::execution_statistics))
        .route("/jobs/:id", get(handlers::get_execution))
        // Monitoring
        .route("/monitoring/rules", get(handlers::list_rules))
        .route("/monitoring/rules", post(handlers::create_rule))
        .route("/monitoring/jobs", post(handlers::create_monitoring_job))
        .route("/monitoring/timeseries", post(handlers::ingest_timeseries))
        .route("/monitoring/alerts", get(handlers::list_alerts))
        .route(
            "/monitoring/alerts/:id/acknowledge",
            post(handlers::acknowledge_alert),
        )
        .route(
            "/monitoring/alerts/:id/resolve",
            post(handlers::resolve_alert),
        )
        // Twins & simulation
        .route("/twins", get(handlers::list_twins))
        .route("/twins", post(handlers::create_twin))
        .route("/twins/:id", get(handlers::get_twin))
        .route("/twins/:id", delete(handlers::delete_twin))
        .route("/twins/:id/scenarios", post(handlers::create_scenario))
        .route(
            "/twins/:id/scenarios/:sid/run",
            post(handlers::run_scenario),
        )
        .route("/simulations/runs/:rid", get(handlers::get_simulation_run))
        .route(
            "/simulations/runs/:rid/timeline",
            get(handlers::get_simulation_timeline),
        )
        .route(
            "/simulations/runs/:rid/impact",
            get(handlers::get_simulation_impact),
        )
        .with_state(state)
}

/// Full application router with middleware.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
