use thiserror::Error;
use uuid::Uuid;

use crate::validation::ValidationIssue;

/// Errors from repository operations (used by trait definitions in flowdesk-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the workflow registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow has {} validation error(s)", .0.len())]
    NotValid(Vec<ValidationIssue>),

    #[error("workflow {id} v{version} is {status} and cannot be changed")]
    Immutable {
        id: Uuid,
        version: u32,
        status: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid workflow scope: {0}")]
    InvalidScope(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for RegistryError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => RegistryError::NotFound("no matching record".to_string()),
            RepositoryError::Conflict(msg) => RegistryError::Conflict(msg),
            other => RegistryError::Storage(other.to_string()),
        }
    }
}
