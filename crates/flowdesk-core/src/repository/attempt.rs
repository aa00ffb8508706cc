//! Append-only transition attempt ledger.
//!
//! No update or delete method exists. Corrections are recorded as new attempts.

use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{OutcomeCounts, TransitionAttempt};
use uuid::Uuid;

pub trait AttemptStore: Send + Sync {
    /// Append one attempt. Fails with `Conflict` if the id was already recorded.
    fn record(
        &self,
        attempt: &TransitionAttempt,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All attempts for an execution, oldest first.
    fn by_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TransitionAttempt>, RepositoryError>> + Send;

    /// All attempts against a workflow, optionally one version, oldest first.
    fn by_workflow(
        &self,
        workflow_id: &Uuid,
        version: Option<u32>,
    ) -> impl std::future::Future<Output = Result<Vec<TransitionAttempt>, RepositoryError>> + Send;

    /// Newest attempts for an organization, newest first.
    fn recent_by_organization(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TransitionAttempt>, RepositoryError>> + Send;

    fn outcome_counts(
        &self,
        organization_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<OutcomeCounts, RepositoryError>> + Send;
}
