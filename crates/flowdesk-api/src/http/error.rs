//! Application error type mapping to HTTP status codes and the envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowdesk_core::engine::EngineError;
use flowdesk_core::workflow::ParseError;
use flowdesk_types::error::{RegistryError, RepositoryError};

use crate::http::response::{ApiErrorDetail, ApiMeta, ApiResponse};

#[derive(Debug)]
pub enum AppError {
    Registry(RegistryError),
    Engine(EngineError),
    Parse(ParseError),
    Repository(RepositoryError),
    /// Malformed path or query input.
    BadRequest(String),
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Registry(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<ParseError> for AppError {
    fn from(e: ParseError) -> Self {
        AppError::Parse(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

type Mapped = (StatusCode, &'static str, String, Option<serde_json::Value>);

fn map_registry(e: &RegistryError) -> Mapped {
    match e {
        RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string(), None),
        RegistryError::NotValid(issues) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "NOT_VALID",
            e.to_string(),
            serde_json::to_value(issues).ok(),
        ),
        RegistryError::Immutable { .. } | RegistryError::Conflict(_) => {
            (StatusCode::CONFLICT, "CONFLICT", e.to_string(), None)
        }
        RegistryError::InvalidScope(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string(), None),
        RegistryError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string(), None),
    }
}

fn map_repository(e: &RepositoryError) -> Mapped {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string(), None),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", e.to_string(), None),
        RepositoryError::Connection | RepositoryError::Query(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string(), None)
        }
    }
}

impl AppError {
    fn mapped(&self) -> Mapped {
        match self {
            AppError::Registry(e) => map_registry(e),
            AppError::Engine(EngineError::Registry(e)) => map_registry(e),
            AppError::Engine(EngineError::Repository(e)) => map_repository(e),
            AppError::Engine(e @ EngineError::InvalidWorkflow(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NOT_VALID", e.to_string(), None)
            }
            AppError::Parse(e) => (
                StatusCode::BAD_REQUEST,
                "PARSE_ERROR",
                e.to_string(),
                e.location().map(|l| json!({ "location": l.to_string() })),
            ),
            AppError::Repository(e) => map_repository(e),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.mapped();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::debug!(code, %message, "request refused");
        }

        let body: ApiResponse<()> = ApiResponse {
            data: None,
            meta: ApiMeta::new(uuid::Uuid::now_v7().to_string(), 0),
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message,
                details,
            }],
            links: Default::default(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdesk_core::workflow::parser::Location;
    use flowdesk_types::validation::{ValidationCode, ValidationIssue};

    fn code_of(err: AppError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        let (status, code, _, details) = err.mapped();
        (status, code, details)
    }

    #[test]
    fn not_valid_carries_issues() {
        let err = AppError::from(RegistryError::NotValid(vec![ValidationIssue::new(
            ValidationCode::DanglingToStatus,
            "transition 'x' targets unknown status",
        )]));
        let (status, code, details) = code_of(err);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "NOT_VALID");
        assert_eq!(details.unwrap()[0]["code"], "DANGLING_TO_STATUS");
    }

    #[test]
    fn parse_error_carries_location() {
        let err = AppError::from(ParseError::MalformedRow {
            location: Location::Line(4),
            message: "expected 4 columns".to_string(),
        });
        let (status, code, details) = code_of(err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "PARSE_ERROR");
        assert_eq!(details.unwrap()["location"], "line 4");
    }

    #[test]
    fn engine_errors_unwrap_to_their_source() {
        let (status, code, _) = code_of(AppError::from(EngineError::Registry(RegistryError::NotFound(
            "no active workflow".to_string(),
        ))));
        assert_eq!((status, code), (StatusCode::NOT_FOUND, "NOT_FOUND"));

        let (status, code, _) = code_of(AppError::from(EngineError::Repository(RepositoryError::Query(
            "disk I/O error".to_string(),
        ))));
        assert_eq!((status, code), (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"));
    }

    #[test]
    fn immutable_is_conflict() {
        let (status, code, _) = code_of(AppError::from(RegistryError::Immutable {
            id: uuid::Uuid::nil(),
            version: 1,
            status: "archived".to_string(),
        }));
        assert_eq!((status, code), (StatusCode::CONFLICT, "CONFLICT"));
    }
}
