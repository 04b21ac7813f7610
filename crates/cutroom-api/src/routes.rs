//! API routes.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::health::{health, ready};
use crate::handlers::projects::{
    add_videos, create_project, get_project, project_stats, refresh_project, retry_stuck,
    run_analysis, start_project,
};
use crate::handlers::recovery::{check_stuck, fail_workflow, retry_workflow};
use crate::handlers::reviews::{approve_render, submit_block_modifications, submit_review1};
use crate::handlers::workflows::{
    create_workflow, delete_workflow, get_workflow, list_workflows, run_step,
};
use crate::metrics::metrics_middleware;
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let workflow_routes = Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows", get(list_workflows))
        .route("/workflows/:id", get(get_workflow))
        .route("/workflows/:id", delete(delete_workflow))
        // Manual step dispatch (queue if configured, inline otherwise)
        .route("/workflows/:id/steps/:step", post(run_step))
        // Review gates
        .route("/workflows/:id/review/markup", post(submit_review1))
        .route("/workflows/:id/review/render", post(approve_render))
        .route("/workflows/:id/review/blocks", post(submit_block_modifications))
        // Recovery
        .route("/workflows/:id/stuck", get(check_stuck))
        .route("/workflows/:id/retry", post(retry_workflow))
        .route("/workflows/:id/fail", post(fail_workflow));

    let project_routes = Router::new()
        .route("/projects", post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/videos", post(add_videos))
        .route("/projects/:id/start", post(start_project))
        .route("/projects/:id/stats", get(project_stats))
        .route("/projects/:id/refresh", post(refresh_project))
        .route("/projects/:id/retry-stuck", post(retry_stuck))
        .route("/projects/:id/analysis/:step", post(run_analysis));

    let api_routes = Router::new().merge(workflow_routes).merge(project_routes);

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(parsed)
    }
}
