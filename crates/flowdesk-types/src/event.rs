//! Event types for the flowdesk event bus.
//!
//! `WorkflowEvent` is broadcast by the registry and execution engine.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionRef, RejectReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// An execution moved to a new status.
    TransitionApplied {
        attempt_id: Uuid,
        execution_id: Uuid,
        execution_ref: ExecutionRef,
        transition_id: String,
        from_status_id: String,
        to_status_id: String,
        completed: bool,
    },
    /// A transition request was refused and recorded.
    TransitionRejected {
        attempt_id: Uuid,
        execution_id: Uuid,
        execution_ref: ExecutionRef,
        transition_id: String,
        reason: RejectReason,
    },
    /// A config version was promoted; `archived_version` is the one it replaced.
    WorkflowActivated {
        workflow_id: Uuid,
        version: u32,
        organization_id: String,
        entity_type: String,
        archived_version: Option<u32>,
    },
    /// Emitted by the `notify_watchers` post-function.
    WatchersNotified {
        execution_ref: ExecutionRef,
        transition_id: String,
        audience: String,
        message: String,
    },
}

impl WorkflowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::TransitionApplied { .. } => "transition_applied",
            WorkflowEvent::TransitionRejected { .. } => "transition_rejected",
            WorkflowEvent::WorkflowActivated { .. } => "workflow_activated",
            WorkflowEvent::WatchersNotified { .. } => "watchers_notified",
        }
    }
}
