//! Workflow config endpoints: import, lookup, activation, attempt history.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowdesk_core::repository::AttemptStore;
use flowdesk_core::workflow::{DialectHint, parse, validate};

use super::parse_uuid;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    /// Raw export text, tabular or XML.
    pub content: String,
    pub organization_id: String,
    pub entity_type: String,
    #[serde(default)]
    pub dialect: Option<DialectHint>,
    /// Store as the next version of this workflow instead of a new one.
    #[serde(default)]
    pub revision_of: Option<Uuid>,
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub organization_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub version: Option<u32>,
}

fn workflow_href(id: &Uuid, version: u32) -> String {
    format!("/api/v1/workflows/{id}/versions/{version}")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows/import
pub async fn import_workflow(
    State(state): State<AppState>,
    Json(body): Json<ImportBody>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();

    let mut parsed = parse(&body.content, body.dialect)?;
    parsed.organization_id = body.organization_id;
    parsed.entity_type = body.entity_type;

    let stored = state.registry.import(parsed, body.revision_of.as_ref()).await?;
    let validation = validate(&stored);
    let stored = if body.activate {
        state.registry.activate(&stored.id, Some(stored.version)).await?
    } else {
        stored
    };

    let href = workflow_href(&stored.id, stored.version);
    Ok(Json(
        clock
            .respond(json!({ "workflow": stored, "validation": validation }))
            .with_link("self", href),
    ))
}

/// GET /api/v1/workflows?organization_id=
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let configs = state.registry.list(query.organization_id.as_deref()).await?;
    Ok(Json(clock.respond(json!(configs)).with_link("self", "/api/v1/workflows")))
}

/// GET /api/v1/workflows/{id}/versions/{version}
pub async fn get_workflow_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, u32)>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_uuid(&id, "workflow")?;
    let config = state.registry.get_by_id_version(&id, version).await?;
    Ok(Json(
        clock
            .respond(json!(config))
            .with_link("self", workflow_href(&id, version))
            .with_link("attempts", format!("/api/v1/workflows/{id}/attempts?version={version}")),
    ))
}

/// POST /api/v1/workflows/{id}/activate?version=
///
/// Without `version` the latest version is activated.
pub async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_uuid(&id, "workflow")?;
    let active = state.registry.activate(&id, query.version).await?;
    let href = workflow_href(&active.id, active.version);
    Ok(Json(clock.respond(json!(active)).with_link("self", href)))
}

/// GET /api/v1/organizations/{org}/workflows/active/{entity_type}
pub async fn get_active_workflow(
    State(state): State<AppState>,
    Path((org, entity_type)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let config = state.registry.get_active(&org, &entity_type).await?;
    let href = workflow_href(&config.id, config.version);
    Ok(Json(clock.respond(json!(config)).with_link("self", href)))
}

/// GET /api/v1/workflows/{id}/attempts?version=
pub async fn list_workflow_attempts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_uuid(&id, "workflow")?;
    let attempts = state.engine.attempts().by_workflow(&id, query.version).await?;
    Ok(Json(clock.respond(json!(attempts))))
}
