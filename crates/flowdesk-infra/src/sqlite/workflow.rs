//! SQLite workflow config repository.
//!
//! Each `(id, version)` is one row. The full config is stored as a JSON
//! document in `definition`; the lifecycle columns (`status`,
//! `activated_at`) are authoritative and overlaid on the document when read,
//! since activation and archiving only touch those columns.

use chrono::{DateTime, Utc};
use flowdesk_core::repository::{PromoteOutcome, WorkflowRepository};
use flowdesk_types::error::RepositoryError;
use flowdesk_types::workflow::{WorkflowConfig, WorkflowStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, write_error};

pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct ConfigRow {
    id: String,
    version: i64,
    status: String,
    definition: String,
    activated_at: Option<String>,
}

impl ConfigRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            status: row.try_get("status")?,
            definition: row.try_get("definition")?,
            activated_at: row.try_get("activated_at")?,
        })
    }

    fn into_config(self) -> Result<WorkflowConfig, RepositoryError> {
        let mut config: WorkflowConfig = serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))?;

        // Guard against a definition blob filed under the wrong key.
        let id = parse_uuid(&self.id)?;
        if config.id != id || i64::from(config.version) != self.version {
            return Err(RepositoryError::Query(format!(
                "definition for {id} v{} carries {} v{}",
                self.version, config.id, config.version
            )));
        }

        config.status = self
            .status
            .parse::<WorkflowStatus>()
            .map_err(RepositoryError::Query)?;
        config.activated_at = self
            .activated_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;
        Ok(config)
    }
}

fn collect_configs(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowConfig>, RepositoryError> {
    let mut configs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = ConfigRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        configs.push(r.into_config()?);
    }
    Ok(configs)
}

fn optional_config(row: Option<sqlx::sqlite::SqliteRow>) -> Result<Option<WorkflowConfig>, RepositoryError> {
    match row {
        Some(row) => {
            let r = ConfigRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(Some(r.into_config()?))
        }
        None => Ok(None),
    }
}

const CONFIG_COLUMNS: &str = "id, version, status, definition, activated_at";

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert_config(&self, config: &WorkflowConfig) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(config)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_configs
               (id, version, organization_id, entity_type, name, status, definition, created_at, activated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(config.id.to_string())
        .bind(i64::from(config.version))
        .bind(&config.organization_id)
        .bind(&config.entity_type)
        .bind(&config.name)
        .bind(config.status.to_string())
        .bind(&definition)
        .bind(format_datetime(&config.created_at))
        .bind(config.activated_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_error(e, || format!("workflow {} v{} already exists", config.id, config.version)))?;

        Ok(())
    }

    async fn get_config(&self, id: &Uuid, version: u32) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM workflow_configs WHERE id = ? AND version = ?"
        ))
        .bind(id.to_string())
        .bind(i64::from(version))
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        optional_config(row)
    }

    async fn latest_config(&self, id: &Uuid) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM workflow_configs WHERE id = ? ORDER BY version DESC LIMIT 1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        optional_config(row)
    }

    async fn find_active(
        &self,
        organization_id: &str,
        entity_type: &str,
    ) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM workflow_configs
             WHERE organization_id = ? AND entity_type = ? AND status = 'active'
             ORDER BY activated_at DESC LIMIT 1"
        ))
        .bind(organization_id)
        .bind(entity_type)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        optional_config(row)
    }

    async fn list_configs(&self, organization_id: Option<&str>) -> Result<Vec<WorkflowConfig>, RepositoryError> {
        let rows = match organization_id {
            Some(org) => {
                sqlx::query(&format!(
                    "SELECT {CONFIG_COLUMNS} FROM workflow_configs WHERE organization_id = ?
                     ORDER BY name ASC, version ASC"
                ))
                .bind(org)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CONFIG_COLUMNS} FROM workflow_configs ORDER BY organization_id ASC, name ASC, version ASC"
                ))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_configs(&rows)
    }

    async fn promote(
        &self,
        id: &Uuid,
        version: u32,
        activated_at: DateTime<Utc>,
    ) -> Result<PromoteOutcome, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let target = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS}, organization_id, entity_type, name
             FROM workflow_configs WHERE id = ? AND version = ?"
        ))
        .bind(id.to_string())
        .bind(i64::from(version))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        let row = ConfigRow::from_row(&target).map_err(|e| RepositoryError::Query(e.to_string()))?;
        if row.status != WorkflowStatus::Draft.to_string() {
            return Err(RepositoryError::Conflict(format!(
                "workflow {id} v{version} is {} and cannot be promoted",
                row.status
            )));
        }
        let organization_id: String = target
            .try_get("organization_id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let entity_type: String = target
            .try_get("entity_type")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let name: String = target
            .try_get("name")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // A version of the same workflow stays in the demotion set even when a
        // revision renamed it.
        let previous: Vec<(String, i64)> = sqlx::query_as(
            "SELECT id, version FROM workflow_configs
             WHERE status = 'active'
               AND ((organization_id = ? AND entity_type = ? AND name = ?) OR id = ?)
             ORDER BY version ASC",
        )
        .bind(&organization_id)
        .bind(&entity_type)
        .bind(&name)
        .bind(id.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Demote first so the partial unique index never sees two active rows.
        sqlx::query(
            "UPDATE workflow_configs SET status = 'archived'
             WHERE status = 'active'
               AND ((organization_id = ? AND entity_type = ? AND name = ?) OR id = ?)",
        )
        .bind(&organization_id)
        .bind(&entity_type)
        .bind(&name)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let promoted = sqlx::query(
            "UPDATE workflow_configs SET status = 'active', activated_at = ?
             WHERE id = ? AND version = ? AND status = 'draft'",
        )
        .bind(format_datetime(&activated_at))
        .bind(id.to_string())
        .bind(i64::from(version))
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, || format!("another version of '{name}' is already active")))?;

        if promoted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "workflow {id} v{version} changed during promotion"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut config = row.into_config()?;
        config.status = WorkflowStatus::Active;
        config.activated_at = Some(activated_at);

        let archived = previous
            .into_iter()
            .map(|(prev_id, prev_version)| Ok((parse_uuid(&prev_id)?, prev_version as u32)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(PromoteOutcome { config, archived })
    }

    async fn archive(&self, id: &Uuid, version: u32) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_configs SET status = 'archived'
             WHERE id = ? AND version = ? AND status != 'archived'",
        )
        .bind(id.to_string())
        .bind(i64::from(version))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM workflow_configs WHERE id = ? AND version = ?")
                .bind(id.to_string())
                .bind(i64::from(version))
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::test_pool;
    use flowdesk_types::workflow::{Condition, Status, StatusCategory, Transition};

    fn sample_config(name: &str, version: u32, id: Uuid) -> WorkflowConfig {
        let mut config = WorkflowConfig::draft(name);
        config.id = id;
        config.version = version;
        config.organization_id = "acme".to_string();
        config.entity_type = "ticket".to_string();
        config.tags = vec!["jira.version=8".to_string()];
        config.statuses = vec![
            Status {
                id: "open".to_string(),
                name: "Open".to_string(),
                category: StatusCategory::New,
            },
            Status {
                id: "closed".to_string(),
                name: "Closed".to_string(),
                category: StatusCategory::Done,
            },
        ];
        config.transitions = vec![Transition {
            id: "close".to_string(),
            name: "Close".to_string(),
            from_status_id: "open".to_string(),
            to_status_id: "closed".to_string(),
            conditions: vec![Condition::new("actor_has_role").with_param("role", "agent")],
            post_functions: Vec::new(),
        }];
        config
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trips_graph() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        let config = sample_config("Support", 1, id);

        repo.insert_config(&config).await.unwrap();
        let loaded = repo.get_config(&id, 1).await.unwrap().unwrap();

        assert_eq!(loaded.name, "Support");
        assert_eq!(loaded.statuses, config.statuses);
        assert_eq!(loaded.transitions, config.transitions);
        assert_eq!(loaded.tags, config.tags);
        assert_eq!(loaded.status, WorkflowStatus::Draft);
        assert!(repo.get_config(&id, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_version_is_conflict() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, id)).await.unwrap();

        let err = repo
            .insert_config(&sample_config("Support", 1, id))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_latest_config_picks_highest_version() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        for v in 1..=3 {
            repo.insert_config(&sample_config("Support", v, id)).await.unwrap();
        }
        assert_eq!(repo.latest_config(&id).await.unwrap().unwrap().version, 3);
        assert!(repo.latest_config(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_archives_previous_active() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, id)).await.unwrap();
        repo.insert_config(&sample_config("Support", 2, id)).await.unwrap();

        let first = repo.promote(&id, 1, Utc::now()).await.unwrap();
        assert_eq!(first.config.status, WorkflowStatus::Active);
        assert!(first.archived.is_empty());

        let second = repo.promote(&id, 2, Utc::now()).await.unwrap();
        assert_eq!(second.archived, vec![(id, 1)]);

        let v1 = repo.get_config(&id, 1).await.unwrap().unwrap();
        assert_eq!(v1.status, WorkflowStatus::Archived);
        let active = repo.find_active("acme", "ticket").await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert!(active.activated_at.is_some());
    }

    #[tokio::test]
    async fn test_promote_archives_renamed_earlier_version() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, id)).await.unwrap();
        repo.insert_config(&sample_config("Customer Support", 2, id)).await.unwrap();
        repo.promote(&id, 1, Utc::now()).await.unwrap();

        let renamed = repo.promote(&id, 2, Utc::now()).await.unwrap();
        assert_eq!(renamed.archived, vec![(id, 1)]);
        let v1 = repo.get_config(&id, 1).await.unwrap().unwrap();
        assert_eq!(v1.status, WorkflowStatus::Archived);
        let active: Vec<_> = repo
            .list_configs(Some("acme"))
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.status == WorkflowStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Customer Support");
    }

    #[tokio::test]
    async fn test_promote_rejects_non_draft_and_missing() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, id)).await.unwrap();
        repo.promote(&id, 1, Utc::now()).await.unwrap();

        let again = repo.promote(&id, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(again, RepositoryError::Conflict(_)));

        let missing = repo.promote(&id, 9, Utc::now()).await.unwrap_err();
        assert!(matches!(missing, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_find_active_prefers_most_recent_activation() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let older = Uuid::now_v7();
        let newer = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, older)).await.unwrap();
        repo.insert_config(&sample_config("Incidents", 1, newer)).await.unwrap();

        let t0 = Utc::now();
        repo.promote(&older, 1, t0).await.unwrap();
        repo.promote(&newer, 1, t0 + chrono::Duration::seconds(1)).await.unwrap();

        let active = repo.find_active("acme", "ticket").await.unwrap().unwrap();
        assert_eq!(active.id, newer);
        assert!(repo.find_active("acme", "asset").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_and_list() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let id = Uuid::now_v7();
        repo.insert_config(&sample_config("Support", 1, id)).await.unwrap();

        let mut other = sample_config("Assets", 1, Uuid::now_v7());
        other.organization_id = "globex".to_string();
        repo.insert_config(&other).await.unwrap();

        assert!(repo.archive(&id, 1).await.unwrap());
        assert!(!repo.archive(&id, 1).await.unwrap());
        assert!(matches!(
            repo.archive(&id, 5).await.unwrap_err(),
            RepositoryError::NotFound
        ));

        assert_eq!(repo.list_configs(None).await.unwrap().len(), 2);
        let acme = repo.list_configs(Some("acme")).await.unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].status, WorkflowStatus::Archived);
    }
}
