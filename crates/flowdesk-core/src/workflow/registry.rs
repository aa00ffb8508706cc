//! Workflow registry service.
//!
//! Owns config versioning and lifecycle. Generic over `WorkflowRepository`
//! so flowdesk-core never depends on flowdesk-infra.
//!
//! Lifecycle: `register` stores version 1 as a draft, `revise` stores version
//! n+1 as a draft, `activate` validates and atomically swaps the active
//! version, `archive` retires a version. Stored graphs are never rewritten.

use chrono::Utc;
use flowdesk_types::error::RegistryError;
use flowdesk_types::event::WorkflowEvent;
use flowdesk_types::validation::ValidationResult;
use flowdesk_types::workflow::{WorkflowConfig, WorkflowStatus};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::WorkflowRepository;

use super::validator::validate;

pub struct WorkflowRegistry<W: WorkflowRepository> {
    repo: W,
    events: EventBus,
}

impl<W: WorkflowRepository> WorkflowRegistry<W> {
    pub fn new(repo: W, events: EventBus) -> Self {
        Self { repo, events }
    }

    pub fn repository(&self) -> &W {
        &self.repo
    }

    /// Store a new config as version 1, `draft`.
    ///
    /// A nil id is replaced with a fresh UUIDv7. Invalid configs may be
    /// stored; they just cannot be activated.
    pub async fn register(&self, mut config: WorkflowConfig) -> Result<WorkflowConfig, RegistryError> {
        if config.organization_id.trim().is_empty() {
            return Err(RegistryError::InvalidScope("organization id is required".to_string()));
        }
        if config.entity_type.trim().is_empty() {
            return Err(RegistryError::InvalidScope("entity type is required".to_string()));
        }
        if config.id.is_nil() {
            config.id = Uuid::now_v7();
        }
        config.version = 1;
        config.status = WorkflowStatus::Draft;
        config.created_at = Utc::now();
        config.activated_at = None;

        self.repo.insert_config(&config).await?;
        tracing::info!(
            workflow_id = %config.id,
            name = %config.name,
            org = %config.organization_id,
            entity_type = %config.entity_type,
            "registered workflow draft"
        );
        Ok(config)
    }

    /// Store an edited copy of the latest version as version n+1, `draft`.
    ///
    /// Identity fields (id, organization, entity type) cannot be changed by
    /// the edit.
    pub async fn revise<F>(&self, id: &Uuid, edit: F) -> Result<WorkflowConfig, RegistryError>
    where
        F: FnOnce(&mut WorkflowConfig),
    {
        let latest = self.latest(id).await?;
        let mut next = latest.clone();
        edit(&mut next);

        next.id = latest.id;
        next.organization_id = latest.organization_id;
        next.entity_type = latest.entity_type;
        next.version = latest.version + 1;
        next.status = WorkflowStatus::Draft;
        next.created_at = Utc::now();
        next.activated_at = None;

        self.repo.insert_config(&next).await?;
        tracing::info!(workflow_id = %next.id, version = next.version, "stored workflow revision");
        Ok(next)
    }

    /// Store a freshly parsed config, either as a new workflow or as the
    /// next version of `revision_of`.
    ///
    /// A revision keeps the existing id and must target the same
    /// organization and entity type.
    pub async fn import(
        &self,
        parsed: WorkflowConfig,
        revision_of: Option<&Uuid>,
    ) -> Result<WorkflowConfig, RegistryError> {
        let Some(id) = revision_of else {
            return self.register(parsed).await;
        };

        let latest = self.latest(id).await?;
        if latest.organization_id != parsed.organization_id || latest.entity_type != parsed.entity_type {
            return Err(RegistryError::InvalidScope(format!(
                "workflow {id} belongs to {}/{}, not {}/{}",
                latest.organization_id, latest.entity_type, parsed.organization_id, parsed.entity_type
            )));
        }

        self.revise(id, move |next| {
            next.name = parsed.name;
            next.description = parsed.description;
            next.tags = parsed.tags;
            next.initial_status_id = parsed.initial_status_id;
            next.statuses = parsed.statuses;
            next.transitions = parsed.transitions;
        })
        .await
    }

    /// Validate a version and make it the active one for its
    /// organization + entity type + name. Any active version of the same
    /// workflow id is archived too, even under an older name.
    ///
    /// `version = None` targets the latest version. Activating a version that
    /// is already active returns it unchanged.
    pub async fn activate(&self, id: &Uuid, version: Option<u32>) -> Result<WorkflowConfig, RegistryError> {
        let config = match version {
            Some(v) => self.get_by_id_version(id, v).await?,
            None => self.latest(id).await?,
        };

        match config.status {
            WorkflowStatus::Active => return Ok(config),
            WorkflowStatus::Archived => {
                return Err(RegistryError::Immutable {
                    id: config.id,
                    version: config.version,
                    status: config.status.to_string(),
                });
            }
            WorkflowStatus::Draft => {}
        }

        let result = validate(&config);
        if !result.ok {
            tracing::warn!(
                workflow_id = %config.id,
                version = config.version,
                errors = result.errors.len(),
                "refusing to activate invalid workflow"
            );
            return Err(RegistryError::NotValid(result.errors));
        }

        let outcome = self
            .repo
            .promote(&config.id, config.version, Utc::now())
            .await?;

        let archived_version = outcome
            .archived
            .iter()
            .find(|(archived_id, _)| *archived_id == outcome.config.id)
            .or(outcome.archived.first())
            .map(|(_, v)| *v);
        tracing::info!(
            workflow_id = %outcome.config.id,
            version = outcome.config.version,
            archived = ?outcome.archived,
            "activated workflow"
        );
        self.events.publish(WorkflowEvent::WorkflowActivated {
            workflow_id: outcome.config.id,
            version: outcome.config.version,
            organization_id: outcome.config.organization_id.clone(),
            entity_type: outcome.config.entity_type.clone(),
            archived_version,
        });
        Ok(outcome.config)
    }

    /// The active config the engine starts new executions on.
    ///
    /// With several active names for one organization and entity type, the
    /// most recently activated wins.
    pub async fn get_active(&self, organization_id: &str, entity_type: &str) -> Result<WorkflowConfig, RegistryError> {
        self.repo
            .find_active(organization_id, entity_type)
            .await?
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "no active workflow for {organization_id}/{entity_type}"
                ))
            })
    }

    /// Exact version lookup. Works for archived versions too.
    pub async fn get_by_id_version(&self, id: &Uuid, version: u32) -> Result<WorkflowConfig, RegistryError> {
        self.repo
            .get_config(id, version)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("{id} v{version}")))
    }

    pub async fn latest(&self, id: &Uuid) -> Result<WorkflowConfig, RegistryError> {
        self.repo
            .latest_config(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn list(&self, organization_id: Option<&str>) -> Result<Vec<WorkflowConfig>, RegistryError> {
        Ok(self.repo.list_configs(organization_id).await?)
    }

    /// Retire a version. Returns `false` if it was already archived.
    pub async fn archive(&self, id: &Uuid, version: u32) -> Result<bool, RegistryError> {
        let changed = self.repo.archive(id, version).await?;
        if changed {
            tracing::info!(workflow_id = %id, version, "archived workflow version");
        }
        Ok(changed)
    }

    /// Run the validator over a stored version.
    pub async fn validate_version(&self, id: &Uuid, version: u32) -> Result<ValidationResult, RegistryError> {
        let config = self.get_by_id_version(id, version).await?;
        Ok(validate(&config))
    }
}
