//! SQLite execution repository.
//!
//! A status move is a guarded `UPDATE ... WHERE current_status_id = ?` plus
//! the ledger insert, both inside one writer transaction. `rows_affected`
//! on the update says whether it won.

use chrono::{DateTime, Utc};
use flowdesk_core::repository::ExecutionRepository;
use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{ExecutionCounts, ExecutionRef, TransitionAttempt, WorkflowExecution};
use sqlx::Row;
use uuid::Uuid;

use super::attempt::insert_attempt;
use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, write_error};

pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ExecutionRow {
    id: String,
    organization_id: String,
    workflow_id: String,
    workflow_version: i64,
    entity_type: String,
    entity_id: String,
    current_status_id: String,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_version: row.try_get("workflow_version")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            current_status_id: row.try_get("current_status_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            organization_id: self.organization_id,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_version: self.workflow_version as u32,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            current_status_id: self.current_status_id,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

fn optional_execution(row: Option<sqlx::sqlite::SqliteRow>) -> Result<Option<WorkflowExecution>, RepositoryError> {
    match row {
        Some(row) => {
            let r = ExecutionRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(Some(r.into_execution()?))
        }
        None => Ok(None),
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, organization_id, workflow_id, workflow_version, entity_type, entity_id,
                current_status_id, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.organization_id)
        .bind(execution.workflow_id.to_string())
        .bind(i64::from(execution.workflow_version))
        .bind(&execution.entity_type)
        .bind(&execution.entity_id)
        .bind(&execution.current_status_id)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_error(e, || format!("execution for {} already exists", execution.execution_ref())))?;

        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        optional_execution(row)
    }

    async fn find_execution(&self, execution_ref: &ExecutionRef) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_executions
             WHERE organization_id = ? AND entity_type = ? AND entity_id = ?",
        )
        .bind(&execution_ref.organization_id)
        .bind(&execution_ref.entity_type)
        .bind(&execution_ref.entity_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        optional_execution(row)
    }

    async fn apply_transition(
        &self,
        attempt: &TransitionAttempt,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let to_status_id = attempt
            .to_status_id
            .as_deref()
            .ok_or_else(|| RepositoryError::Query(format!("attempt {} has no target status", attempt.id)))?;

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE workflow_executions
             SET current_status_id = ?, completed_at = COALESCE(?, completed_at)
             WHERE id = ? AND current_status_id = ?",
        )
        .bind(to_status_id)
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(attempt.execution_id.to_string())
        .bind(&attempt.from_status_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let moved = result.rows_affected() == 1;
        tracing::trace!(
            execution_id = %attempt.execution_id,
            expected = %attempt.from_status_id,
            new = to_status_id,
            moved,
            "compare-and-set status"
        );
        if !moved {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }

        insert_attempt(&mut *tx, attempt).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(true)
    }

    async fn count_executions(&self, organization_id: Option<&str>) -> Result<ExecutionCounts, RepositoryError> {
        let (total, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(completed_at) FROM workflow_executions
             WHERE (? IS NULL OR organization_id = ?)",
        )
        .bind(organization_id)
        .bind(organization_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ExecutionCounts {
            total: total as u64,
            completed: completed as u64,
        })
    }
}
