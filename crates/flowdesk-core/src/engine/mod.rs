//! Execution engine: the state machine that drives entities through a
//! pinned workflow version.
//!
//! - `conditions` -- condition handler trait and `type -> handler` table
//! - `post_functions` -- post-function handler trait and table
//! - `executor` -- `ExecutionEngine::request_transition`

pub mod conditions;
pub mod executor;
pub mod post_functions;

use std::time::Duration;

use flowdesk_types::config::EngineSettings;
use flowdesk_types::error::{RegistryError, RepositoryError};
use flowdesk_types::execution::{Actor, ExecutionRef, FieldContext};
use flowdesk_types::workflow::StatusCategory;
use thiserror::Error;

pub use conditions::{ConditionHandler, ConditionTable};
pub use executor::ExecutionEngine;
pub use post_functions::{PostFunctionHandler, PostFunctionTable};

/// Failure inside a condition or post-function handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// System failures only. Business rejections are recorded attempts, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
}

/// Tunables for the engine, usually built from `[engine]` in config.toml.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub condition_timeout: Duration,
    pub post_function_timeout: Duration,
    /// Reaching a status in one of these categories sets `completed_at`.
    pub terminal_categories: Vec<StatusCategory>,
    pub accept_legacy_conditions: bool,
}

impl EngineOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            condition_timeout: Duration::from_millis(settings.condition_timeout_ms),
            post_function_timeout: Duration::from_millis(settings.post_function_timeout_ms),
            terminal_categories: settings
                .terminal_categories
                .iter()
                .map(|c| StatusCategory::from_label(c))
                .collect(),
            accept_legacy_conditions: settings.accept_legacy_conditions,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// A request to move one entity along one transition.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub execution_ref: ExecutionRef,
    pub transition_id: String,
    pub actor: Actor,
    /// Field values conditions may inspect.
    pub fields: FieldContext,
    /// The status the caller believes the entity is in.
    pub expected_status_id: Option<String>,
    /// Overrides the per post-function timeout for this request.
    pub timeout: Option<Duration>,
}

impl TransitionRequest {
    pub fn new(execution_ref: ExecutionRef, transition_id: impl Into<String>, actor: Actor) -> Self {
        Self {
            execution_ref,
            transition_id: transition_id.into(),
            actor,
            fields: FieldContext::new(),
            expected_status_id: None,
            timeout: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_fields(mut self, fields: FieldContext) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn expecting(mut self, status_id: impl Into<String>) -> Self {
        self.expected_status_id = Some(status_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
