//! In-memory implementations of the repository traits for core tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flowdesk_types::error::RepositoryError;
use flowdesk_types::execution::{
    AttemptOutcome, ExecutionCounts, ExecutionRef, OutcomeCounts, TransitionAttempt,
    WorkflowExecution,
};
use flowdesk_types::workflow::{
    Condition, Status, StatusCategory, Transition, WorkflowConfig, WorkflowStatus,
};
use uuid::Uuid;

use crate::repository::{AttemptStore, ExecutionRepository, PromoteOutcome, WorkflowRepository};

#[derive(Default)]
pub struct MemoryWorkflowRepository {
    configs: Mutex<Vec<WorkflowConfig>>,
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn insert_config(&self, config: &WorkflowConfig) -> Result<(), RepositoryError> {
        let mut configs = self.configs.lock().unwrap();
        if configs
            .iter()
            .any(|c| c.id == config.id && c.version == config.version)
        {
            return Err(RepositoryError::Conflict(format!(
                "{} v{} exists",
                config.id, config.version
            )));
        }
        configs.push(config.clone());
        Ok(())
    }

    async fn get_config(
        &self,
        id: &Uuid,
        version: u32,
    ) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let configs = self.configs.lock().unwrap();
        Ok(configs
            .iter()
            .find(|c| c.id == *id && c.version == version)
            .cloned())
    }

    async fn latest_config(&self, id: &Uuid) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let configs = self.configs.lock().unwrap();
        Ok(configs
            .iter()
            .filter(|c| c.id == *id)
            .max_by_key(|c| c.version)
            .cloned())
    }

    async fn find_active(
        &self,
        organization_id: &str,
        entity_type: &str,
    ) -> Result<Option<WorkflowConfig>, RepositoryError> {
        let configs = self.configs.lock().unwrap();
        Ok(configs
            .iter()
            .filter(|c| {
                c.status == WorkflowStatus::Active
                    && c.organization_id == organization_id
                    && c.entity_type == entity_type
            })
            .max_by_key(|c| c.activated_at)
            .cloned())
    }

    async fn list_configs(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<WorkflowConfig>, RepositoryError> {
        let configs = self.configs.lock().unwrap();
        Ok(configs
            .iter()
            .filter(|c| organization_id.is_none_or(|org| c.organization_id == org))
            .cloned()
            .collect())
    }

    async fn promote(
        &self,
        id: &Uuid,
        version: u32,
        activated_at: DateTime<Utc>,
    ) -> Result<PromoteOutcome, RepositoryError> {
        let mut configs = self.configs.lock().unwrap();
        let target_idx = configs
            .iter()
            .position(|c| c.id == *id && c.version == version)
            .ok_or(RepositoryError::NotFound)?;
        if configs[target_idx].status != WorkflowStatus::Draft {
            return Err(RepositoryError::Conflict(format!(
                "{id} v{version} is not a draft"
            )));
        }
        let (org, entity_type, name) = {
            let t = &configs[target_idx];
            (t.organization_id.clone(), t.entity_type.clone(), t.name.clone())
        };

        let mut archived = Vec::new();
        for c in configs.iter_mut() {
            let same_name = c.organization_id == org && c.entity_type == entity_type && c.name == name;
            if c.status == WorkflowStatus::Active && (same_name || c.id == *id) {
                c.status = WorkflowStatus::Archived;
                archived.push((c.id, c.version));
            }
        }
        let target = &mut configs[target_idx];
        target.status = WorkflowStatus::Active;
        target.activated_at = Some(activated_at);
        Ok(PromoteOutcome {
            config: target.clone(),
            archived,
        })
    }

    async fn archive(&self, id: &Uuid, version: u32) -> Result<bool, RepositoryError> {
        let mut configs = self.configs.lock().unwrap();
        let config = configs
            .iter_mut()
            .find(|c| c.id == *id && c.version == version)
            .ok_or(RepositoryError::NotFound)?;
        if config.status == WorkflowStatus::Archived {
            return Ok(false);
        }
        config.status = WorkflowStatus::Archived;
        Ok(true)
    }
}

/// Attempt rows shared between the memory execution repository and the
/// memory attempt store, so applied moves and rejections land in one ledger.
#[derive(Default)]
struct Ledger {
    attempts: Mutex<Vec<TransitionAttempt>>,
    fail_inserts: AtomicBool,
}

impl Ledger {
    fn append(&self, attempt: &TransitionAttempt) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("ledger unavailable".to_string()));
        }
        let mut attempts = self.attempts.lock().unwrap();
        if attempts.iter().any(|a| a.id == attempt.id) {
            return Err(RepositoryError::Conflict(format!("attempt {} exists", attempt.id)));
        }
        attempts.push(attempt.clone());
        Ok(())
    }
}

/// An execution repository and attempt store backed by the same ledger.
pub fn memory_stores() -> (MemoryExecutionRepository, MemoryAttemptStore) {
    let ledger = Arc::new(Ledger::default());
    (
        MemoryExecutionRepository {
            executions: Mutex::default(),
            ledger: Arc::clone(&ledger),
        },
        MemoryAttemptStore { ledger },
    )
}

#[derive(Default)]
pub struct MemoryExecutionRepository {
    executions: Mutex<HashMap<Uuid, WorkflowExecution>>,
    ledger: Arc<Ledger>,
}

impl ExecutionRepository for MemoryExecutionRepository {
    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().unwrap();
        let target = execution.execution_ref();
        if executions.values().any(|e| e.execution_ref() == target) {
            return Err(RepositoryError::Conflict(format!("execution for {target} exists")));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.lock().unwrap().get(id).cloned())
    }

    async fn find_execution(
        &self,
        execution_ref: &ExecutionRef,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let executions = self.executions.lock().unwrap();
        Ok(executions
            .values()
            .find(|e| e.execution_ref() == *execution_ref)
            .cloned())
    }

    async fn apply_transition(
        &self,
        attempt: &TransitionAttempt,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let to_status_id = attempt
            .to_status_id
            .clone()
            .ok_or_else(|| RepositoryError::Query(format!("attempt {} has no target status", attempt.id)))?;
        let mut executions = self.executions.lock().unwrap();
        let execution = executions
            .get_mut(&attempt.execution_id)
            .ok_or(RepositoryError::NotFound)?;
        if execution.current_status_id != attempt.from_status_id {
            return Ok(false);
        }
        // Ledger first; the status only moves once the row is in.
        self.ledger.append(attempt)?;
        execution.current_status_id = to_status_id;
        if completed_at.is_some() {
            execution.completed_at = completed_at;
        }
        Ok(true)
    }

    async fn count_executions(
        &self,
        organization_id: Option<&str>,
    ) -> Result<ExecutionCounts, RepositoryError> {
        let executions = self.executions.lock().unwrap();
        let matching: Vec<_> = executions
            .values()
            .filter(|e| organization_id.is_none_or(|org| e.organization_id == org))
            .collect();
        Ok(ExecutionCounts {
            total: matching.len() as u64,
            completed: matching.iter().filter(|e| e.is_completed()).count() as u64,
        })
    }
}

#[derive(Default)]
pub struct MemoryAttemptStore {
    ledger: Arc<Ledger>,
}

impl MemoryAttemptStore {
    pub fn all(&self) -> Vec<TransitionAttempt> {
        self.ledger.attempts.lock().unwrap().clone()
    }

    /// Make every later insert fail, including the ones made by a linked
    /// execution repository.
    pub fn fail_inserts(&self) {
        self.ledger.fail_inserts.store(true, Ordering::SeqCst);
    }
}

impl AttemptStore for MemoryAttemptStore {
    async fn record(&self, attempt: &TransitionAttempt) -> Result<(), RepositoryError> {
        self.ledger.append(attempt)
    }

    async fn by_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let attempts = self.ledger.attempts.lock().unwrap();
        Ok(attempts
            .iter()
            .filter(|a| a.execution_id == *execution_id)
            .cloned()
            .collect())
    }

    async fn by_workflow(
        &self,
        workflow_id: &Uuid,
        version: Option<u32>,
    ) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let attempts = self.ledger.attempts.lock().unwrap();
        Ok(attempts
            .iter()
            .filter(|a| a.workflow_id == *workflow_id)
            .filter(|a| version.is_none_or(|v| a.workflow_version == v))
            .cloned()
            .collect())
    }

    async fn recent_by_organization(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<TransitionAttempt>, RepositoryError> {
        let attempts = self.ledger.attempts.lock().unwrap();
        Ok(attempts
            .iter()
            .rev()
            .filter(|a| a.organization_id == organization_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn outcome_counts(
        &self,
        organization_id: Option<&str>,
    ) -> Result<OutcomeCounts, RepositoryError> {
        let attempts = self.ledger.attempts.lock().unwrap();
        let mut counts = OutcomeCounts::default();
        for a in attempts
            .iter()
            .filter(|a| organization_id.is_none_or(|org| a.organization_id == org))
        {
            match a.outcome {
                AttemptOutcome::Applied => counts.applied += 1,
                AttemptOutcome::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn status(id: &str, name: &str, category: StatusCategory) -> Status {
    Status {
        id: id.to_string(),
        name: name.to_string(),
        category,
    }
}

/// To Do -> In Progress -> In Review -> Done, with an assignee guard on
/// "Start Progress" and an approver role guard on "Approve".
pub fn service_desk_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::draft("Service Desk");
    config.organization_id = "acme".to_string();
    config.entity_type = "ticket".to_string();
    config.statuses = vec![
        status("todo", "To Do", StatusCategory::New),
        status("progress", "In Progress", StatusCategory::InProgress),
        status("review", "In Review", StatusCategory::InProgress),
        status("done", "Done", StatusCategory::Done),
    ];
    config.transitions = vec![
        Transition {
            id: "start".to_string(),
            name: "Start Progress".to_string(),
            from_status_id: "todo".to_string(),
            to_status_id: "progress".to_string(),
            conditions: vec![Condition::new("actor_is_assignee")],
            post_functions: Vec::new(),
        },
        Transition {
            id: "review".to_string(),
            name: "Send for Review".to_string(),
            from_status_id: "progress".to_string(),
            to_status_id: "review".to_string(),
            conditions: Vec::new(),
            post_functions: Vec::new(),
        },
        Transition {
            id: "approve".to_string(),
            name: "Approve".to_string(),
            from_status_id: "review".to_string(),
            to_status_id: "done".to_string(),
            conditions: vec![Condition::new("actor_has_role").with_param("role", "approver")],
            post_functions: Vec::new(),
        },
    ];
    config
}
