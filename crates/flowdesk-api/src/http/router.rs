//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflow configs
        .route("/workflows", get(handlers::workflow::list_workflows))
        .route("/workflows/import", post(handlers::workflow::import_workflow))
        .route(
            "/workflows/{id}/versions/{version}",
            get(handlers::workflow::get_workflow_version),
        )
        .route(
            "/workflows/{id}/activate",
            post(handlers::workflow::activate_workflow),
        )
        .route(
            "/workflows/{id}/attempts",
            get(handlers::workflow::list_workflow_attempts),
        )
        .route(
            "/organizations/{org}/workflows/active/{entity_type}",
            get(handlers::workflow::get_active_workflow),
        )
        // Execution
        .route("/transitions", post(handlers::execution::request_transition))
        .route(
            "/executions/{id}/attempts",
            get(handlers::execution::list_execution_attempts),
        )
        .route(
            "/organizations/{org}/attempts",
            get(handlers::execution::list_recent_attempts),
        )
        // Dashboard
        .route("/stats", get(handlers::stats::get_stats))
        .route("/health", get(handlers::stats::health))
        .route("/events", get(handlers::events::stream_events));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
