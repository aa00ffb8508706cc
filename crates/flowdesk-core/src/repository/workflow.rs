//! Workflow config repository trait definition.
//!
//! Configs are keyed by `(id, version)`. A stored version's graph is never
//! rewritten; only its lifecycle status moves (draft -> active -> archived).

use flowdesk_types::error::RepositoryError;
use flowdesk_types::workflow::WorkflowConfig;
use uuid::Uuid;

/// Result of promoting a draft version to active.
#[derive(Debug, Clone, PartialEq)]
pub struct PromoteOutcome {
    /// The newly active config.
    pub config: WorkflowConfig,
    /// Every `(id, version)` that was active for the same organization +
    /// entity type + name, or under the same id, and got archived.
    pub archived: Vec<(Uuid, u32)>,
}

/// Repository trait for workflow config persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new config version. Fails with `Conflict` if `(id, version)` exists.
    fn insert_config(
        &self,
        config: &WorkflowConfig,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get one exact version.
    fn get_config(
        &self,
        id: &Uuid,
        version: u32,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowConfig>, RepositoryError>> + Send;

    /// Get the highest version stored for `id`.
    fn latest_config(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowConfig>, RepositoryError>> + Send;

    /// Get the most recently activated active config for an organization and entity type.
    fn find_active(
        &self,
        organization_id: &str,
        entity_type: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowConfig>, RepositoryError>> + Send;

    /// List every stored version, optionally filtered by organization.
    fn list_configs(
        &self,
        organization_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowConfig>, RepositoryError>> + Send;

    /// Atomically archive the currently active version sharing the target's
    /// organization, entity type and name, then mark the target active.
    ///
    /// Only a `draft` target may be promoted: `NotFound` if `(id, version)`
    /// does not exist, `Conflict` if it is not a draft.
    fn promote(
        &self,
        id: &Uuid,
        version: u32,
        activated_at: chrono::DateTime<chrono::Utc>,
    ) -> impl std::future::Future<Output = Result<PromoteOutcome, RepositoryError>> + Send;

    /// Mark a version archived. Returns `false` if it was already archived.
    fn archive(
        &self,
        id: &Uuid,
        version: u32,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
