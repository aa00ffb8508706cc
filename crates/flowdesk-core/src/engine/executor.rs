//! `ExecutionEngine` -- evaluates and applies transition requests.
//!
//! Per request:
//! 1. resolve the execution, creating it at the active config's initial status
//! 2. load the exact config version the execution is pinned to
//! 3. resolve the transition (`UnknownTransition`)
//! 4. check the caller's expected status (`ConcurrentModification`)
//! 5. check the declared source status (`InvalidSourceStatus`)
//! 6. evaluate conditions in order, first failure wins (`ConditionFailed`)
//! 7. run post-functions in order, first failure stops the rest (`PostFunctionFailed`)
//! 8. compare-and-set the status and append the applied attempt in one unit
//!    (`ConcurrentModification` if the status moved)
//! 9. record rejected attempts, then publish an event
//!
//! No lock is held across any of these awaits. The only guarded write is the
//! status move in step 8, and an applied attempt is never stored without it.
//! Post-functions that ran before a failure are not compensated; their
//! effects stay listed on the rejected attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowdesk_types::error::RepositoryError;
use flowdesk_types::event::WorkflowEvent;
use flowdesk_types::execution::{
    AttemptOutcome, ExecutionRef, PostFunctionResult, RejectReason, TransitionAttempt,
    WorkflowExecution,
};
use flowdesk_types::workflow::WorkflowConfig;
use uuid::Uuid;

use super::conditions::{ConditionContext, ConditionTable, Verdict};
use super::post_functions::{PostFunctionContext, PostFunctionTable};
use super::{EngineError, EngineOptions, TransitionRequest};
use crate::event::EventBus;
use crate::repository::{AttemptStore, ExecutionRepository, WorkflowRepository};
use crate::workflow::WorkflowRegistry;

enum Decision {
    /// Every check and post-function passed; the status move is still pending.
    Ready { completed: bool },
    Rejected(RejectReason),
}

pub struct ExecutionEngine<W, E, A>
where
    W: WorkflowRepository,
    E: ExecutionRepository,
    A: AttemptStore,
{
    registry: Arc<WorkflowRegistry<W>>,
    executions: E,
    attempts: A,
    conditions: ConditionTable,
    post_functions: PostFunctionTable,
    events: EventBus,
    options: EngineOptions,
    /// Pinned config versions. Stored graphs never change, so entries never go stale.
    pinned: DashMap<(Uuid, u32), Arc<WorkflowConfig>>,
}

impl<W, E, A> ExecutionEngine<W, E, A>
where
    W: WorkflowRepository,
    E: ExecutionRepository,
    A: AttemptStore,
{
    /// Create an engine with the built-in condition and post-function catalogs.
    pub fn new(
        registry: Arc<WorkflowRegistry<W>>,
        executions: E,
        attempts: A,
        events: EventBus,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            executions,
            attempts,
            conditions: ConditionTable::builtin(options.accept_legacy_conditions),
            post_functions: PostFunctionTable::builtin(),
            events,
            options,
            pinned: DashMap::new(),
        }
    }

    pub fn with_conditions(mut self, conditions: ConditionTable) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_post_functions(mut self, post_functions: PostFunctionTable) -> Self {
        self.post_functions = post_functions;
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry<W> {
        &self.registry
    }

    pub fn executions(&self) -> &E {
        &self.executions
    }

    pub fn attempts(&self) -> &A {
        &self.attempts
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Find the execution for an entity, or start one at the initial status
    /// of the currently active config.
    pub async fn start_execution(&self, execution_ref: &ExecutionRef) -> Result<WorkflowExecution, EngineError> {
        if let Some(existing) = self.executions.find_execution(execution_ref).await? {
            return Ok(existing);
        }

        let config = self
            .registry
            .get_active(&execution_ref.organization_id, &execution_ref.entity_type)
            .await?;
        let initial = config.initial_status().ok_or_else(|| {
            EngineError::InvalidWorkflow(format!(
                "workflow {} v{} has no initial status",
                config.id, config.version
            ))
        })?;

        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            organization_id: execution_ref.organization_id.clone(),
            workflow_id: config.id,
            workflow_version: config.version,
            entity_type: execution_ref.entity_type.clone(),
            entity_id: execution_ref.entity_id.clone(),
            current_status_id: initial.id.clone(),
            started_at: Utc::now(),
            completed_at: None,
        };

        match self.executions.create_execution(&execution).await {
            Ok(()) => {
                tracing::info!(
                    execution_id = %execution.id,
                    entity = %execution_ref,
                    workflow_id = %config.id,
                    version = config.version,
                    status = %execution.current_status_id,
                    "started workflow execution"
                );
                self.pinned
                    .insert((config.id, config.version), Arc::new(config));
                Ok(execution)
            }
            // Another request created it first; use theirs.
            Err(RepositoryError::Conflict(_)) => self
                .executions
                .find_execution(execution_ref)
                .await?
                .ok_or(EngineError::Repository(RepositoryError::NotFound)),
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate and, if every check passes, apply a transition.
    ///
    /// Rejections are returned as `Ok` attempts with `outcome = Rejected`;
    /// they are recorded before this returns. `Err` means the engine could
    /// not evaluate or record the request at all.
    pub async fn request_transition(&self, request: TransitionRequest) -> Result<TransitionAttempt, EngineError> {
        let execution = self.start_execution(&request.execution_ref).await?;
        let config = self
            .pinned_config(execution.workflow_id, execution.workflow_version)
            .await?;

        let mut attempt = TransitionAttempt {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            organization_id: execution.organization_id.clone(),
            workflow_id: execution.workflow_id,
            workflow_version: execution.workflow_version,
            transition_id: request.transition_id.clone(),
            from_status_id: execution.current_status_id.clone(),
            to_status_id: None,
            actor_id: request.actor.id.clone(),
            requested_at: Utc::now(),
            outcome: AttemptOutcome::Rejected,
            reject_reason: None,
            post_function_results: Vec::new(),
        };

        let decision = self
            .decide(&config, &execution, &request, &mut attempt)
            .await?;

        let completed = match decision {
            Decision::Ready { completed } => {
                attempt.outcome = AttemptOutcome::Applied;
                let moved = self
                    .executions
                    .apply_transition(&attempt, completed.then(Utc::now))
                    .await?;
                if moved {
                    completed
                } else {
                    let actual = self
                        .executions
                        .get_execution(&execution.id)
                        .await?
                        .map(|e| e.current_status_id)
                        .unwrap_or_default();
                    attempt.outcome = AttemptOutcome::Rejected;
                    attempt.reject_reason = Some(RejectReason::ConcurrentModification {
                        expected_status_id: attempt.from_status_id.clone(),
                        actual_status_id: actual,
                    });
                    self.attempts.record(&attempt).await?;
                    false
                }
            }
            Decision::Rejected(reason) => {
                attempt.reject_reason = Some(reason);
                self.attempts.record(&attempt).await?;
                false
            }
        };

        let execution_ref = execution.execution_ref();
        match &attempt.reject_reason {
            None => {
                let to_status_id = attempt.to_status_id.clone().unwrap_or_default();
                tracing::info!(
                    attempt_id = %attempt.id,
                    entity = %execution_ref,
                    transition = %attempt.transition_id,
                    from = %attempt.from_status_id,
                    to = %to_status_id,
                    actor = %attempt.actor_id,
                    completed,
                    "transition applied"
                );
                self.events.publish(WorkflowEvent::TransitionApplied {
                    attempt_id: attempt.id,
                    execution_id: attempt.execution_id,
                    execution_ref,
                    transition_id: attempt.transition_id.clone(),
                    from_status_id: attempt.from_status_id.clone(),
                    to_status_id,
                    completed,
                });
            }
            Some(reason) => {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    entity = %execution_ref,
                    transition = %attempt.transition_id,
                    actor = %attempt.actor_id,
                    code = reason.code(),
                    %reason,
                    "transition rejected"
                );
                self.events.publish(WorkflowEvent::TransitionRejected {
                    attempt_id: attempt.id,
                    execution_id: attempt.execution_id,
                    execution_ref,
                    transition_id: attempt.transition_id.clone(),
                    reason: reason.clone(),
                });
            }
        }

        Ok(attempt)
    }

    async fn pinned_config(&self, id: Uuid, version: u32) -> Result<Arc<WorkflowConfig>, EngineError> {
        if let Some(config) = self.pinned.get(&(id, version)) {
            return Ok(Arc::clone(config.value()));
        }
        let config = Arc::new(self.registry.get_by_id_version(&id, version).await?);
        self.pinned.insert((id, version), Arc::clone(&config));
        Ok(config)
    }

    async fn decide(
        &self,
        config: &WorkflowConfig,
        execution: &WorkflowExecution,
        request: &TransitionRequest,
        attempt: &mut TransitionAttempt,
    ) -> Result<Decision, EngineError> {
        let current = execution.current_status_id.as_str();

        let Some(transition) = config.transition(&request.transition_id) else {
            return Ok(Decision::Rejected(RejectReason::UnknownTransition {
                transition_id: request.transition_id.clone(),
            }));
        };
        attempt.to_status_id = Some(transition.to_status_id.clone());

        if let Some(expected) = &request.expected_status_id {
            if expected != current {
                return Ok(Decision::Rejected(RejectReason::ConcurrentModification {
                    expected_status_id: expected.clone(),
                    actual_status_id: current.to_string(),
                }));
            }
        }

        if transition.from_status_id != current {
            return Ok(Decision::Rejected(RejectReason::InvalidSourceStatus {
                required_status_id: transition.from_status_id.clone(),
                current_status_id: current.to_string(),
            }));
        }

        let (Some(from_status), Some(to_status)) = (
            config.status(&transition.from_status_id),
            config.status(&transition.to_status_id),
        ) else {
            return Err(EngineError::InvalidWorkflow(format!(
                "transition '{}' in {} v{} has an unresolved endpoint",
                transition.id, config.id, config.version
            )));
        };

        // Conditions: logical AND, first failure short-circuits.
        let condition_ctx = ConditionContext {
            actor: &request.actor,
            fields: &request.fields,
            execution,
            transition,
        };
        for (index, condition) in transition.conditions.iter().enumerate() {
            let failure = match self.conditions.get(&condition.kind) {
                None => Some(format!("unknown condition type '{}'", condition.kind)),
                Some(handler) => {
                    let evaluation = tokio::time::timeout(
                        self.options.condition_timeout,
                        handler.evaluate_boxed(condition, &condition_ctx),
                    )
                    .await;
                    match evaluation {
                        Ok(Ok(Verdict::Satisfied)) => None,
                        Ok(Ok(Verdict::Unsatisfied(message))) => Some(message),
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(_) => Some(timed_out(self.options.condition_timeout)),
                    }
                }
            };
            tracing::debug!(
                index,
                condition = %condition.kind,
                satisfied = failure.is_none(),
                "evaluated condition"
            );
            if let Some(message) = failure {
                return Ok(Decision::Rejected(RejectReason::ConditionFailed {
                    index,
                    condition_type: condition.kind.clone(),
                    message,
                }));
            }
        }

        // Post-functions: strictly in order, stop at the first failure.
        let post_timeout = request.timeout.unwrap_or(self.options.post_function_timeout);
        let post_ctx = PostFunctionContext {
            actor: &request.actor,
            execution,
            transition,
            from_status,
            to_status,
            events: &self.events,
        };
        for (index, function) in transition.post_functions.iter().enumerate() {
            let result = match self.post_functions.get(&function.kind) {
                None => Err(format!("unknown post-function type '{}'", function.kind)),
                Some(handler) => {
                    match tokio::time::timeout(post_timeout, handler.execute_boxed(function, &post_ctx)).await {
                        Ok(Ok(effect)) => Ok(effect),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(timed_out(post_timeout)),
                    }
                }
            };
            tracing::debug!(index, function = %function.kind, ok = result.is_ok(), "ran post-function");
            match result {
                Ok(effect) => attempt
                    .post_function_results
                    .push(PostFunctionResult::applied(&function.kind, effect)),
                Err(message) => {
                    attempt
                        .post_function_results
                        .push(PostFunctionResult::failed(&function.kind, &message));
                    return Ok(Decision::Rejected(RejectReason::PostFunctionFailed {
                        index,
                        function_type: function.kind.clone(),
                        message,
                    }));
                }
            }
        }

        let completed = self.options.terminal_categories.contains(&to_status.category);
        Ok(Decision::Ready { completed })
    }
}

fn timed_out(after: Duration) -> String {
    format!("timed out after {}ms", after.as_millis())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::conditions::ConditionHandler;
    use crate::engine::post_functions::PostFunctionHandler;
    use crate::engine::HandlerError;
    use crate::testing::{
        MemoryAttemptStore, MemoryExecutionRepository, MemoryWorkflowRepository,
        memory_stores, service_desk_config,
    };
    use flowdesk_types::execution::{Actor, PostFunctionEffect, PostFunctionOutcome};
    use flowdesk_types::workflow::{Condition, PostFunction};
    use serde_json::json;

    type Engine = ExecutionEngine<MemoryWorkflowRepository, MemoryExecutionRepository, MemoryAttemptStore>;

    /// Sleeps for `ms` milliseconds, then succeeds with no effect.
    struct Pause;

    impl PostFunctionHandler for Pause {
        fn function_type(&self) -> &str {
            "pause"
        }

        async fn execute(
            &self,
            function: &PostFunction,
            _ctx: &PostFunctionContext<'_>,
        ) -> Result<Option<PostFunctionEffect>, HandlerError> {
            let ms = function.param("ms").and_then(|v| v.parse().ok()).unwrap_or(50);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(None)
        }
    }

    struct Explode;

    impl PostFunctionHandler for Explode {
        fn function_type(&self) -> &str {
            "explode"
        }

        async fn execute(
            &self,
            _function: &PostFunction,
            _ctx: &PostFunctionContext<'_>,
        ) -> Result<Option<PostFunctionEffect>, HandlerError> {
            Err(HandlerError::Failed("mail relay unavailable".to_string()))
        }
    }

    struct Never;

    impl ConditionHandler for Never {
        fn condition_type(&self) -> &str {
            "never_resolves"
        }

        async fn evaluate(
            &self,
            _condition: &Condition,
            _ctx: &ConditionContext<'_>,
        ) -> Result<Verdict, HandlerError> {
            std::future::pending::<()>().await;
            Ok(Verdict::Satisfied)
        }
    }

    async fn engine_with(config: WorkflowConfig, options: EngineOptions) -> (Engine, EventBus) {
        let bus = EventBus::new(64);
        let registry = Arc::new(WorkflowRegistry::new(MemoryWorkflowRepository::default(), bus.clone()));
        let stored = registry.register(config).await.unwrap();
        registry.activate(&stored.id, None).await.unwrap();

        let mut post_functions = PostFunctionTable::builtin();
        post_functions.register(Pause);
        post_functions.register(Explode);
        let mut conditions = ConditionTable::builtin(options.accept_legacy_conditions);
        conditions.register(Never);

        let (executions, attempts) = memory_stores();
        let engine = ExecutionEngine::new(
            registry,
            executions,
            attempts,
            bus.clone(),
            options,
        )
        .with_conditions(conditions)
        .with_post_functions(post_functions);
        (engine, bus)
    }

    async fn engine() -> Engine {
        engine_with(service_desk_config(), EngineOptions::default()).await.0
    }

    fn ticket(id: &str) -> ExecutionRef {
        ExecutionRef::new("acme", "ticket", id)
    }

    fn start_by(actor: &str) -> TransitionRequest {
        TransitionRequest::new(ticket("T-1"), "start", Actor::new(actor))
            .with_field("assigneeId", json!("alice"))
    }

    async fn current_status(engine: &Engine, r: &ExecutionRef) -> String {
        engine
            .executions()
            .find_execution(r)
            .await
            .unwrap()
            .unwrap()
            .current_status_id
    }

    #[tokio::test]
    async fn non_assignee_is_rejected_and_status_unchanged() {
        let engine = engine().await;
        let attempt = engine.request_transition(start_by("bob")).await.unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::Rejected);
        match attempt.reject_reason.as_ref().unwrap() {
            RejectReason::ConditionFailed { index, condition_type, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(condition_type, "actor_is_assignee");
            }
            other => panic!("unexpected reason: {other:?}"),
        }
        assert_eq!(current_status(&engine, &ticket("T-1")).await, "todo");
        assert_eq!(engine.attempts().all().len(), 1, "rejection is recorded");
    }

    #[tokio::test]
    async fn assignee_moves_ticket_then_illegal_approve_is_rejected() {
        let engine = engine().await;
        let applied = engine.request_transition(start_by("alice")).await.unwrap();
        assert!(applied.is_applied());
        assert_eq!(applied.to_status_id.as_deref(), Some("progress"));
        assert_eq!(current_status(&engine, &ticket("T-1")).await, "progress");

        let approve = TransitionRequest::new(ticket("T-1"), "approve", Actor::new("carol").with_role("approver"));
        let rejected = engine.request_transition(approve).await.unwrap();
        assert_eq!(
            rejected.reject_reason,
            Some(RejectReason::InvalidSourceStatus {
                required_status_id: "review".to_string(),
                current_status_id: "progress".to_string(),
            })
        );
        assert!(rejected.post_function_results.is_empty());
        assert_eq!(current_status(&engine, &ticket("T-1")).await, "progress");
    }

    #[tokio::test]
    async fn ledger_failure_leaves_status_unmoved() {
        let (engine, bus) = engine_with(service_desk_config(), EngineOptions::default()).await;
        let mut rx = bus.subscribe();
        engine.start_execution(&ticket("T-1")).await.unwrap();
        engine.attempts().fail_inserts();

        let err = engine.request_transition(start_by("alice")).await.unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));
        assert_eq!(current_status(&engine, &ticket("T-1")).await, "todo");
        assert!(engine.attempts().all().is_empty());
        assert!(
            !std::iter::from_fn(|| rx.try_recv().ok())
                .any(|e| matches!(e, WorkflowEvent::TransitionApplied { .. })),
            "nothing is announced for an unrecorded move"
        );
    }

    #[tokio::test]
    async fn invalid_source_status_is_repeatable() {
        let engine = engine().await;
        for _ in 0..3 {
            let attempt = engine
                .request_transition(TransitionRequest::new(ticket("T-2"), "review", Actor::new("x")))
                .await
                .unwrap();
            assert_eq!(attempt.reject_reason.unwrap().code(), "invalid_source_status");
        }
        assert_eq!(current_status(&engine, &ticket("T-2")).await, "todo");
        assert_eq!(engine.attempts().all().len(), 3);
    }

    #[tokio::test]
    async fn unknown_transition_has_no_target() {
        let engine = engine().await;
        let attempt = engine
            .request_transition(TransitionRequest::new(ticket("T-3"), "teleport", Actor::new("x")))
            .await
            .unwrap();
        assert_eq!(
            attempt.reject_reason,
            Some(RejectReason::UnknownTransition { transition_id: "teleport".to_string() })
        );
        assert!(attempt.to_status_id.is_none());
    }

    #[tokio::test]
    async fn stale_expected_status_is_concurrent_modification() {
        let engine = engine().await;
        engine.request_transition(start_by("alice")).await.unwrap();

        let stale = start_by("alice").expecting("todo");
        let attempt = engine.request_transition(stale).await.unwrap();
        assert_eq!(
            attempt.reject_reason,
            Some(RejectReason::ConcurrentModification {
                expected_status_id: "todo".to_string(),
                actual_status_id: "progress".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn unknown_condition_type_fails_closed() {
        let mut config = service_desk_config();
        config.transitions[1].conditions.push(Condition::new("moon_phase_is_full"));
        config.transitions[0].conditions.clear();
        let (engine, _) = engine_with(config, EngineOptions::default()).await;

        engine
            .request_transition(TransitionRequest::new(ticket("T-4"), "start", Actor::new("x")))
            .await
            .unwrap();
        let attempt = engine
            .request_transition(TransitionRequest::new(ticket("T-4"), "review", Actor::new("x")))
            .await
            .unwrap();
        match attempt.reject_reason.unwrap() {
            RejectReason::ConditionFailed { message, .. } => assert!(message.contains("unknown condition type")),
            other => panic!("unexpected reason: {other:?}"),
        }
    }

    #[tokio::test]
    async fn legacy_labels_fail_closed_unless_accepted() {
        let mut config = service_desk_config();
        config.transitions[0].conditions =
            vec![Condition::new("legacy.label").with_param("label", "Sub-tasks closed")];

        let (strict, _) = engine_with(config.clone(), EngineOptions::default()).await;
        let attempt = strict
            .request_transition(TransitionRequest::new(ticket("T-5"), "start", Actor::new("x")))
            .await
            .unwrap();
        assert!(!attempt.is_applied());

        let lenient_options = EngineOptions {
            accept_legacy_conditions: true,
            ..EngineOptions::default()
        };
        let (lenient, _) = engine_with(config, lenient_options).await;
        let attempt = lenient
            .request_transition(TransitionRequest::new(ticket("T-5"), "start", Actor::new("x")))
            .await
            .unwrap();
        assert!(attempt.is_applied());
    }

    #[tokio::test]
    async fn condition_timeout_rejects() {
        let mut config = service_desk_config();
        config.transitions[0].conditions = vec![Condition::new("never_resolves")];
        let options = EngineOptions {
            condition_timeout: Duration::from_millis(20),
            ..EngineOptions::default()
        };
        let (engine, _) = engine_with(config, options).await;
        let attempt = engine
            .request_transition(TransitionRequest::new(ticket("T-6"), "start", Actor::new("x")))
            .await
            .unwrap();
        match attempt.reject_reason.unwrap() {
            RejectReason::ConditionFailed { message, .. } => assert!(message.contains("timed out")),
            other => panic!("unexpected reason: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_post_function_stops_chain_without_rollback() {
        let mut config = service_desk_config();
        config.transitions[0].conditions.clear();
        config.transitions[0].post_functions = vec![
            PostFunction::new("set_field").with_param("field", "resolution").with_param("value", "Started"),
            PostFunction::new("explode"),
            PostFunction::new("reassign").with_param("to", "actor"),
        ];
        let (engine, _) = engine_with(config, EngineOptions::default()).await;

        let attempt = engine
            .request_transition(TransitionRequest::new(ticket("T-7"), "start", Actor::new("x")))
            .await
            .unwrap();

        assert_eq!(attempt.outcome, AttemptOutcome::Rejected);
        assert_eq!(attempt.post_function_results.len(), 2, "third never ran");
        assert_eq!(attempt.post_function_results[0].outcome, PostFunctionOutcome::Applied);
        assert_eq!(attempt.post_function_results[1].outcome, PostFunctionOutcome::Failed);
        assert_eq!(attempt.effects().count(), 1, "earlier effect is reported, not undone");
        match attempt.reject_reason.unwrap() {
            RejectReason::PostFunctionFailed { index, function_type, message } => {
                assert_eq!(index, 1);
                assert_eq!(function_type, "explode");
                assert!(message.contains("mail relay"));
            }
            other => panic!("unexpected reason: {other:?}"),
        }
        assert_eq!(current_status(&engine, &ticket("T-7")).await, "todo");
    }

    #[tokio::test]
    async fn post_function_timeout_is_failed_result() {
        let mut config = service_desk_config();
        config.transitions[0].conditions.clear();
        config.transitions[0].post_functions = vec![PostFunction::new("pause").with_param("ms", "500")];
        let (engine, _) = engine_with(config, EngineOptions::default()).await;

        let request = TransitionRequest::new(ticket("T-8"), "start", Actor::new("x"))
            .with_timeout(Duration::from_millis(10));
        let attempt = engine.request_transition(request).await.unwrap();

        assert_eq!(attempt.post_function_results[0].outcome, PostFunctionOutcome::Failed);
        assert!(attempt.post_function_results[0]
            .message
            .as_deref()
            .unwrap()
            .contains("timed out"));
        assert_eq!(current_status(&engine, &ticket("T-8")).await, "todo");
    }

    #[tokio::test]
    async fn reaching_done_completes_execution_and_publishes() {
        let (engine, bus) = engine_with(service_desk_config(), EngineOptions::default()).await;
        let mut rx = bus.subscribe();

        engine.request_transition(start_by("alice")).await.unwrap();
        engine
            .request_transition(TransitionRequest::new(ticket("T-1"), "review", Actor::new("alice")))
            .await
            .unwrap();
        let done = engine
            .request_transition(TransitionRequest::new(ticket("T-1"), "approve", Actor::new("carol").with_role("approver")))
            .await
            .unwrap();
        assert!(done.is_applied());

        let execution = engine.executions().find_execution(&ticket("T-1")).await.unwrap().unwrap();
        assert!(execution.is_completed());

        let mut applied = 0;
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::TransitionApplied { completed, to_status_id, .. } = event {
                applied += 1;
                assert_eq!(completed, to_status_id == "done");
            }
        }
        assert_eq!(applied, 3);
    }

    #[tokio::test]
    async fn executions_stay_pinned_to_their_version() {
        let (engine, _) = engine_with(service_desk_config(), EngineOptions::default()).await;
        let first = engine.start_execution(&ticket("OLD")).await.unwrap();
        assert_eq!(first.workflow_version, 1);

        // v2 drops the assignee guard.
        let v2 = engine
            .registry()
            .revise(&first.workflow_id, |c| c.transitions[0].conditions.clear())
            .await
            .unwrap();
        engine.registry().activate(&v2.id, Some(2)).await.unwrap();

        let old = engine
            .request_transition(TransitionRequest::new(ticket("OLD"), "start", Actor::new("bob")))
            .await
            .unwrap();
        assert!(!old.is_applied(), "v1 guard still applies");
        assert_eq!(old.workflow_version, 1);

        let new = engine
            .request_transition(TransitionRequest::new(ticket("NEW"), "start", Actor::new("bob")))
            .await
            .unwrap();
        assert!(new.is_applied());
        assert_eq!(new.workflow_version, 2);
    }

    #[tokio::test]
    async fn no_active_workflow_is_an_error() {
        let engine = engine().await;
        let err = engine
            .request_transition(TransitionRequest::new(ExecutionRef::new("acme", "asset", "A-1"), "start", Actor::new("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Registry(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_conflicting_transitions_apply_exactly_once() {
        let mut config = service_desk_config();
        config.transitions[0].conditions.clear();
        config.transitions[0].post_functions = vec![PostFunction::new("pause").with_param("ms", "50")];
        config.transitions.push(flowdesk_types::workflow::Transition {
            id: "cancel".to_string(),
            name: "Cancel".to_string(),
            from_status_id: "todo".to_string(),
            to_status_id: "done".to_string(),
            conditions: Vec::new(),
            post_functions: vec![PostFunction::new("pause").with_param("ms", "50")],
        });
        let (engine, _) = engine_with(config, EngineOptions::default()).await;
        let engine = Arc::new(engine);
        let r = ticket("RACE");
        engine.start_execution(&r).await.unwrap();

        let a = {
            let engine = Arc::clone(&engine);
            let r = r.clone();
            tokio::spawn(async move {
                engine
                    .request_transition(TransitionRequest::new(r, "start", Actor::new("a")).expecting("todo"))
                    .await
            })
        };
        let b = {
            let engine = Arc::clone(&engine);
            let r = r.clone();
            tokio::spawn(async move {
                engine
                    .request_transition(TransitionRequest::new(r, "cancel", Actor::new("b")).expecting("todo"))
                    .await
            })
        };
        let results = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let applied: Vec<_> = results.iter().filter(|a| a.is_applied()).collect();
        let rejected: Vec<_> = results.iter().filter(|a| !a.is_applied()).collect();
        assert_eq!(applied.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            rejected[0].reject_reason.as_ref().unwrap().code(),
            "concurrent_modification"
        );

        let stored = engine.attempts().by_execution(&results[0].execution_id).await.unwrap();
        assert_eq!(stored.iter().filter(|a| a.is_applied()).count(), 1);
        assert!(stored.iter().any(|a| !a.is_applied()));
        assert_eq!(
            current_status(&engine, &r).await,
            applied[0].to_status_id.clone().unwrap()
        );
    }
}
