//! Dashboard aggregates over the three stores.

use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::DashboardStats;
use flowdesk_types::workflow::WorkflowStatus;

use crate::repository::{AttemptStore, ExecutionRepository, WorkflowRepository};

pub struct ReportingService<'a, W, E, A> {
    workflows: &'a W,
    executions: &'a E,
    attempts: &'a A,
}

impl<'a, W, E, A> ReportingService<'a, W, E, A>
where
    W: WorkflowRepository,
    E: ExecutionRepository,
    A: AttemptStore,
{
    pub fn new(workflows: &'a W, executions: &'a E, attempts: &'a A) -> Self {
        Self {
            workflows,
            executions,
            attempts,
        }
    }

    /// Counts across every organization when `organization_id` is `None`.
    pub async fn summary(&self, organization_id: Option<&str>) -> Result<DashboardStats, RepositoryError> {
        let configs = self.workflows.list_configs(organization_id).await?;
        let executions = self.executions.count_executions(organization_id).await?;
        let outcomes = self.attempts.outcome_counts(organization_id).await?;

        let total = outcomes.total();
        let success_rate = if total == 0 {
            0.0
        } else {
            outcomes.applied as f64 / total as f64
        };

        Ok(DashboardStats {
            total_workflows: configs.len() as u64,
            active_workflows: configs
                .iter()
                .filter(|c| c.status == WorkflowStatus::Active)
                .count() as u64,
            total_executions: executions.total,
            completed_executions: executions.completed,
            applied_attempts: outcomes.applied,
            rejected_attempts: outcomes.rejected,
            success_rate,
        })
    }
}
