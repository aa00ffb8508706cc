//! SQLite transition attempt ledger.
//!
//! Rows are only ever inserted. The migration installs triggers that abort
//! any UPDATE or DELETE on `transition_attempts`.

use flowdesk_core::repository::AttemptStore;
use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{
    AttemptOutcome, OutcomeCounts, PostFunctionResult, RejectReason, TransitionAttempt,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, write_error};

pub struct SqliteAttemptStore {
    pool: DatabasePool,
}

impl SqliteAttemptStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct AttemptRow {
    id: String,
    execution_id: String,
    organization_id: String,
    workflow_id: String,
    workflow_version: i64,
    transition_id: String,
    from_status_id: String,
    to_status_id: Option<String>,
    actor_id: String,
    requested_at: String,
    outcome: String,
    reject_reason: Option<String>,
    post_function_results: String,
}

impl AttemptRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            organization_id: row.try_get("organization_id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_version: row.try_get("workflow_version")?,
            transition_id: row.try_get("transition_id")?,
            from_status_id: row.try_get("from_status_id")?,
            to_status_id: row.try_get("to_status_id")?,
            actor_id: row.try_get("actor_id")?,
            requested_at: row.try_get("requested_at")?,
            outcome: row.try_get("outcome")?,
            reject_reason: row.try_get("reject_reason")?,
            post_function_results: row.try_get("post_function_results")?,
        })
    }

    fn into_attempt(self) -> Result<TransitionAttempt, RepositoryError> {
        let outcome: AttemptOutcome = self.outcome.parse().map_err(RepositoryError::Query)?;

        let reject_reason = self
            .reject_reason
            .as_deref()
            .map(|s| {
                serde_json::from_str::<RejectReason>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid reject_reason: {e}")))
            })
            .transpose()?;

        let post_function_results: Vec<PostFunctionResult> =
            serde_json::from_str(&self.post_function_results)
                .map_err(|e| RepositoryError::Query(format!("invalid post_function_results: {e}")))?;

        Ok(TransitionAttempt {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            organization_id: self.organization_id,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_version: self.workflow_version as u32,
            transition_id: self.transition_id,
            from_status_id: self.from_status_id,
            to_status_id: self.to_status_id,
            actor_id: self.actor_id,
            requested_at: parse_datetime(&self.requested_at)?,
            outcome,
            reject_reason,
            post_function_results,
        })
    }
}

fn collect_attempts(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<TransitionAttempt>, RepositoryError> {
    let mut attempts = Vec::with_capacity(rows.len());
    for row in rows {
        let r = AttemptRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        attempts.push(r.into_attempt()?);
    }
    Ok(attempts)
}

/// Append one attempt row. Shared by `record` and the execution repository,
/// which inserts applied attempts inside its status-move transaction.
pub(super) async fn insert_attempt<'c, X>(executor: X, attempt: &TransitionAttempt) -> Result<(), RepositoryError>
where
    X: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let reject_reason = attempt
        .reject_reason
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let post_function_results = serde_json::to_string(&attempt.post_function_results)
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    sqlx::query(
        r#"INSERT INTO transition_attempts
           (id, execution_id, organization_id, workflow_id, workflow_version, transition_id,
            from_status_id, to_status_id, actor_id, requested_at, outcome, reject_reason,
            post_function_results)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(attempt.id.to_string())
    .bind(attempt.execution_id.to_string())
    .bind(&attempt.organization_id)
    .bind(attempt.workflow_id.to_string())
    .bind(i64::from(attempt.workflow_version))
    .bind(&attempt.transition_id)
    .bind(&attempt.from_status_id)
    .bind(&attempt.to_status_id)
    .bind(&attempt.actor_id)
    .bind(format_datetime(&attempt.requested_at))
    .bind(attempt.outcome.to_string())
    .bind(&reject_reason)
    .bind(&post_function_results)
    .execute(executor)
    .await
    .map_err(|e| write_error(e, || format!("attempt {} already recorded", attempt.id)))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// AttemptStore impl
// ---------------------------------------------------------------------------

impl AttemptStore for SqliteAttemptStore {
    async fn record(&self, attempt: &TransitionAttempt) -> Result<(), RepositoryError> {
        insert_attempt(&self.pool.writer, attempt).await
    }

    async fn by_execution(&self, execution_id: &Uuid) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM transition_attempts WHERE execution_id = ? ORDER BY requested_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_attempts(&rows)
    }

    async fn by_workflow(
        &self,
        workflow_id: &Uuid,
        version: Option<u32>,
    ) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM transition_attempts
             WHERE workflow_id = ? AND (? IS NULL OR workflow_version = ?)
             ORDER BY requested_at ASC, id ASC",
        )
        .bind(workflow_id.to_string())
        .bind(version.map(i64::from))
        .bind(version.map(i64::from))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_attempts(&rows)
    }

    async fn recent_by_organization(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM transition_attempts WHERE organization_id = ?
             ORDER BY requested_at DESC, id DESC LIMIT ?",
        )
        .bind(organization_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_attempts(&rows)
    }

    async fn outcome_counts(&self, organization_id: Option<&str>) -> Result<OutcomeCounts, RepositoryError> {
        let (applied, rejected): (i64, i64) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN outcome = 'applied' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN outcome = 'rejected' THEN 1 ELSE 0 END), 0)
             FROM transition_attempts
             WHERE (? IS NULL OR organization_id = ?)",
        )
        .bind(organization_id)
        .bind(organization_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(OutcomeCounts {
            applied: applied as u64,
            rejected: rejected as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
