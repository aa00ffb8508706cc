//! Transition requests and attempt history.
//!
//! A rejected transition is a normal outcome: `POST /transitions` answers
//! 200 with the recorded attempt whatever its outcome.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use flowdesk_core::engine::TransitionRequest;
use flowdesk_core::repository::{AttemptStore, ExecutionRepository};
use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{Actor, ExecutionRef, FieldContext};

use super::parse_uuid;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub organization_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub transition_id: String,
    pub actor: Actor,
    #[serde(default)]
    pub fields: FieldContext,
    #[serde(default)]
    pub expected_status_id: Option<String>,
    /// Post-function timeout override, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl From<TransitionBody> for TransitionRequest {
    fn from(body: TransitionBody) -> Self {
        TransitionRequest {
            execution_ref: ExecutionRef::new(body.organization_id, body.entity_type, body.entity_id),
            transition_id: body.transition_id,
            actor: body.actor,
            fields: body.fields,
            expected_status_id: body.expected_status_id,
            timeout: body.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// POST /api/v1/transitions
pub async fn request_transition(
    State(state): State<AppState>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let attempt = state.engine.request_transition(body.into()).await?;
    let href = format!("/api/v1/executions/{}/attempts", attempt.execution_id);
    Ok(Json(clock.respond(json!(attempt)).with_link("history", href)))
}

/// GET /api/v1/executions/{id}/attempts
pub async fn list_execution_attempts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_uuid(&id, "execution")?;
    let execution = state
        .engine
        .executions()
        .get_execution(&id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    let attempts = state.engine.attempts().by_execution(&id).await?;
    Ok(Json(clock.respond(json!({
        "execution": execution,
        "attempts": attempts,
    }))))
}

/// GET /api/v1/organizations/{org}/attempts?limit=
pub async fn list_recent_attempts(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let limit = query.limit.unwrap_or(state.config.history.recent_limit);
    let attempts = state
        .engine
        .attempts()
        .recent_by_organization(&org, limit)
        .await?;
    Ok(Json(clock.respond(json!(attempts))))
}
