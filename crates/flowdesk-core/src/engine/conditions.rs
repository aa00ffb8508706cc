//! Condition handlers and the `type -> handler` dispatch table.
//!
//! Follows the blanket-impl pattern used for boxed dynamic dispatch:
//! 1. `ConditionHandler` uses native async fn in traits
//! 2. `ConditionHandlerDyn` is the object-safe twin with boxed futures
//! 3. every `ConditionHandler` is automatically a `ConditionHandlerDyn`
//!
//! Types missing from the table are never evaluated; the engine treats them
//! as failed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowdesk_types::execution::{Actor, FieldContext, WorkflowExecution};
use flowdesk_types::workflow::{Condition, Transition};
use serde_json::Value;

use super::HandlerError;

/// Everything a condition may look at.
pub struct ConditionContext<'a> {
    pub actor: &'a Actor,
    pub fields: &'a FieldContext,
    pub execution: &'a WorkflowExecution,
    pub transition: &'a Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    /// Not satisfied, with a human-readable explanation.
    Unsatisfied(String),
}

pub trait ConditionHandler: Send + Sync {
    /// The `type` string this handler answers to.
    fn condition_type(&self) -> &str;

    fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> impl Future<Output = Result<Verdict, HandlerError>> + Send;
}

/// Object-safe version of [`ConditionHandler`] with boxed futures.
pub trait ConditionHandlerDyn: Send + Sync {
    fn condition_type(&self) -> &str;

    fn evaluate_boxed<'a>(
        &'a self,
        condition: &'a Condition,
        ctx: &'a ConditionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict, HandlerError>> + Send + 'a>>;
}

impl<T: ConditionHandler> ConditionHandlerDyn for T {
    fn condition_type(&self) -> &str {
        ConditionHandler::condition_type(self)
    }

    fn evaluate_boxed<'a>(
        &'a self,
        condition: &'a Condition,
        ctx: &'a ConditionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict, HandlerError>> + Send + 'a>> {
        Box::pin(self.evaluate(condition, ctx))
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ConditionTable {
    handlers: HashMap<String, Arc<dyn ConditionHandlerDyn>>,
}

impl ConditionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in catalog. `legacy.label` is only included when
    /// `accept_legacy` is set.
    pub fn builtin(accept_legacy: bool) -> Self {
        let mut table = Self::empty();
        table.register(ActorIsAssignee);
        table.register(ActorHasRole);
        table.register(ActorHasPermission);
        table.register(FieldNotEmpty);
        table.register(FieldEquals);
        if accept_legacy {
            table.register(LegacyLabel);
        }
        table
    }

    /// Register a handler, replacing any existing one for the same type.
    pub fn register<H: ConditionHandler + 'static>(&mut self, handler: H) {
        let handler: Arc<dyn ConditionHandlerDyn> = Arc::new(handler);
        self.handlers
            .insert(handler.condition_type().to_string(), handler);
    }

    pub fn get(&self, condition_type: &str) -> Option<Arc<dyn ConditionHandlerDyn>> {
        self.handlers.get(condition_type).cloned()
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ConditionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionTable")
            .field("types", &self.types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in conditions
// ---------------------------------------------------------------------------

fn required<'c>(condition: &'c Condition, key: &str) -> Result<&'c str, HandlerError> {
    condition
        .param(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| HandlerError::MissingParameter(key.to_string()))
}

/// Null, blank strings, `false`, and empty arrays/objects count as empty.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The actor must be the entity's assignee (`field`, default `assigneeId`).
pub struct ActorIsAssignee;

impl ConditionHandler for ActorIsAssignee {
    fn condition_type(&self) -> &str {
        "actor_is_assignee"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        let field = condition.param("field").unwrap_or("assigneeId");
        Ok(match ctx.fields.get(field) {
            Some(value) if !is_empty_value(value) && value_text(value) == ctx.actor.id => {
                Verdict::Satisfied
            }
            Some(value) if !is_empty_value(value) => Verdict::Unsatisfied(format!(
                "actor '{}' is not the assignee ('{}')",
                ctx.actor.id,
                value_text(value)
            )),
            _ => Verdict::Unsatisfied(format!("entity has no '{field}' to compare against")),
        })
    }
}

pub struct ActorHasRole;

impl ConditionHandler for ActorHasRole {
    fn condition_type(&self) -> &str {
        "actor_has_role"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        let role = required(condition, "role")?;
        Ok(if ctx.actor.has_role(role) {
            Verdict::Satisfied
        } else {
            Verdict::Unsatisfied(format!("actor '{}' lacks role '{role}'", ctx.actor.id))
        })
    }
}

pub struct ActorHasPermission;

impl ConditionHandler for ActorHasPermission {
    fn condition_type(&self) -> &str {
        "actor_has_permission"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        let permission = required(condition, "permission")?;
        Ok(if ctx.actor.has_permission(permission) {
            Verdict::Satisfied
        } else {
            Verdict::Unsatisfied(format!(
                "actor '{}' lacks permission '{permission}'",
                ctx.actor.id
            ))
        })
    }
}

pub struct FieldNotEmpty;

impl ConditionHandler for FieldNotEmpty {
    fn condition_type(&self) -> &str {
        "field_not_empty"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        let field = required(condition, "field")?;
        Ok(match ctx.fields.get(field) {
            Some(value) if !is_empty_value(value) => Verdict::Satisfied,
            _ => Verdict::Unsatisfied(format!("field '{field}' is empty")),
        })
    }
}

pub struct FieldEquals;

impl ConditionHandler for FieldEquals {
    fn condition_type(&self) -> &str {
        "field_equals"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        let field = required(condition, "field")?;
        let expected = condition
            .param("value")
            .ok_or_else(|| HandlerError::MissingParameter("value".to_string()))?;
        let actual = ctx.fields.get(field).map(value_text);
        Ok(if actual.as_deref() == Some(expected) {
            Verdict::Satisfied
        } else {
            Verdict::Unsatisfied(format!(
                "field '{field}' is {} (expected '{expected}')",
                actual.map(|a| format!("'{a}'")).unwrap_or_else(|| "missing".to_string())
            ))
        })
    }
}

/// Accepts unclassified export labels as informational.
pub struct LegacyLabel;

impl ConditionHandler for LegacyLabel {
    fn condition_type(&self) -> &str {
        "legacy.label"
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        _ctx: &ConditionContext<'_>,
    ) -> Result<Verdict, HandlerError> {
        tracing::debug!(label = condition.param("label").unwrap_or_default(), "legacy condition accepted");
        Ok(Verdict::Satisfied)
    }
}
