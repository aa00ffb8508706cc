//! Execution repository trait definition.

use chrono::{DateTime, Utc};
use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{ExecutionCounts, ExecutionRef, TransitionAttempt, WorkflowExecution};
use uuid::Uuid;

/// Storage for per-entity execution state.
///
/// `current_status_id` is the only mutable column, and it only moves
/// through `apply_transition`.
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution. Fails with `Conflict` if one already exists
    /// for the same `(organization_id, entity_type, entity_id)`.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    fn find_execution(
        &self,
        execution_ref: &ExecutionRef,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Move `current_status_id` from `attempt.from_status_id` to
    /// `attempt.to_status_id` and append `attempt` to the ledger, as one unit.
    ///
    /// Returns `false` (and writes nothing) when the stored status is no
    /// longer `from_status_id`. On `Err` neither write is visible.
    fn apply_transition(
        &self,
        attempt: &TransitionAttempt,
        completed_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn count_executions(
        &self,
        organization_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<ExecutionCounts, RepositoryError>> + Send;
}
