//! Execution tracking and audit types.
//!
//! A `WorkflowExecution` is the runtime record of one entity moving through a
//! pinned workflow version. Every transition request, applied or rejected,
//! produces an immutable `TransitionAttempt`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Field values supplied by the caller for condition evaluation
/// (e.g. `{"assigneeId": "u-7", "hasComment": true}`).
pub type FieldContext = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Execution reference and record
// ---------------------------------------------------------------------------

/// Opaque pointer to the entity governed by a workflow.
///
/// The engine never loads the entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionRef {
    pub organization_id: String,
    pub entity_type: String,
    pub entity_id: String,
}

impl ExecutionRef {
    pub fn new(
        organization_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id, self.entity_type, self.entity_id
        )
    }
}

/// One entity's progress through a workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub organization_id: String,
    pub workflow_id: Uuid,
    /// The version this execution is pinned to for its whole lifetime.
    pub workflow_version: u32,
    pub entity_type: String,
    pub entity_id: String,
    pub current_status_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn execution_ref(&self) -> ExecutionRef {
        ExecutionRef::new(&self.organization_id, &self.entity_type, &self.entity_id)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The user requesting a transition, as supplied by the calling application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

// ---------------------------------------------------------------------------
// Attempt outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Applied,
    Rejected,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Applied => write!(f, "applied"),
            AttemptOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(AttemptOutcome::Applied),
            "rejected" => Ok(AttemptOutcome::Rejected),
            other => Err(format!("unknown attempt outcome: '{other}'")),
        }
    }
}

/// Machine-readable reason a transition request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    /// No transition with this id exists in the pinned config.
    UnknownTransition { transition_id: String },
    /// The transition does not leave the execution's current status.
    InvalidSourceStatus {
        required_status_id: String,
        current_status_id: String,
    },
    /// The first condition (in declared order) that did not hold.
    ConditionFailed {
        index: usize,
        condition_type: String,
        message: String,
    },
    /// A post-function errored or timed out.
    PostFunctionFailed {
        index: usize,
        function_type: String,
        message: String,
    },
    /// The execution's status moved underneath this request.
    ConcurrentModification {
        expected_status_id: String,
        actual_status_id: String,
    },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::UnknownTransition { .. } => "unknown_transition",
            RejectReason::InvalidSourceStatus { .. } => "invalid_source_status",
            RejectReason::ConditionFailed { .. } => "condition_failed",
            RejectReason::PostFunctionFailed { .. } => "post_function_failed",
            RejectReason::ConcurrentModification { .. } => "concurrent_modification",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnknownTransition { transition_id } => {
                write!(f, "unknown transition '{transition_id}'")
            }
            RejectReason::InvalidSourceStatus {
                required_status_id,
                current_status_id,
            } => write!(
                f,
                "transition requires status '{required_status_id}' but execution is in '{current_status_id}'"
            ),
            RejectReason::ConditionFailed {
                index,
                condition_type,
                message,
            } => write!(f, "condition #{index} '{condition_type}' failed: {message}"),
            RejectReason::PostFunctionFailed {
                index,
                function_type,
                message,
            } => write!(f, "post-function #{index} '{function_type}' failed: {message}"),
            RejectReason::ConcurrentModification {
                expected_status_id,
                actual_status_id,
            } => write!(
                f,
                "concurrent modification: expected status '{expected_status_id}', found '{actual_status_id}'"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Post-function results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFunctionOutcome {
    Applied,
    Failed,
}

/// An entity-visible consequence the caller is expected to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostFunctionEffect {
    SetField { field: String, value: Value },
    Reassign {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
    },
    Notified { audience: String },
}

/// Result of one post-function call within an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFunctionResult {
    pub function_type: String,
    pub outcome: PostFunctionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<PostFunctionEffect>,
}

impl PostFunctionResult {
    pub fn applied(function_type: impl Into<String>, effect: Option<PostFunctionEffect>) -> Self {
        Self {
            function_type: function_type.into(),
            outcome: PostFunctionOutcome::Applied,
            message: None,
            effect,
        }
    }

    pub fn failed(function_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            function_type: function_type.into(),
            outcome: PostFunctionOutcome::Failed,
            message: Some(message.into()),
            effect: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionAttempt (audit row)
// ---------------------------------------------------------------------------

/// Immutable audit record of one transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAttempt {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub organization_id: String,
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub transition_id: String,
    /// The execution's status when the request was evaluated.
    pub from_status_id: String,
    /// Absent when the transition id did not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status_id: Option<String>,
    pub actor_id: String,
    pub requested_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(default)]
    pub post_function_results: Vec<PostFunctionResult>,
}

impl TransitionAttempt {
    pub fn is_applied(&self) -> bool {
        self.outcome == AttemptOutcome::Applied
    }

    /// Effects of post-functions that ran successfully.
    pub fn effects(&self) -> impl Iterator<Item = &PostFunctionEffect> {
        self.post_function_results
            .iter()
            .filter(|r| r.outcome == PostFunctionOutcome::Applied)
            .filter_map(|r| r.effect.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Reporting projections
// ---------------------------------------------------------------------------

/// Applied/rejected attempt counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub applied: u64,
    pub rejected: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.applied + self.rejected
    }
}

/// Execution totals for an organization (or globally).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub total: u64,
    pub completed: u64,
}

/// Aggregate numbers for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_workflows: u64,
    pub active_workflows: u64,
    pub total_executions: u64,
    pub completed_executions: u64,
    pub applied_attempts: u64,
    pub rejected_attempts: u64,
    /// Applied / total attempts, 0.0 when there are none.
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
