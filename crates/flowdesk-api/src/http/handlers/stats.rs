//! Dashboard statistics and liveness.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub organization_id: Option<String>,
}

/// GET /api/v1/stats?organization_id=
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let stats = state
        .reporting()
        .summary(query.organization_id.as_deref())
        .await?;
    Ok(Json(
        clock
            .respond(json!(stats))
            .with_link("self", "/api/v1/stats")
            .with_link("workflows", "/api/v1/workflows"),
    ))
}

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let clock = RequestClock::start();
    let database = match state.db_pool.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("health check database ping failed: {e}");
            "unavailable"
        }
    };
    Json(clock.respond(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
        "event_subscribers": state.events.subscriber_count(),
    })))
}
