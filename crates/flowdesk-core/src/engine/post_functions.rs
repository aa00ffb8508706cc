//! Post-function handlers and their dispatch table.
//!
//! Post-functions never touch the entity record. They return a
//! `PostFunctionEffect` describing what the calling application should apply
//! (set a field, reassign, ...). `notify_watchers` additionally publishes on
//! the event bus.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowdesk_types::event::WorkflowEvent;
use flowdesk_types::execution::{Actor, PostFunctionEffect, WorkflowExecution};
use flowdesk_types::workflow::{PostFunction, Status, Transition};
use serde_json::Value;

use super::HandlerError;
use crate::event::EventBus;

pub struct PostFunctionContext<'a> {
    pub actor: &'a Actor,
    pub execution: &'a WorkflowExecution,
    pub transition: &'a Transition,
    pub from_status: &'a Status,
    pub to_status: &'a Status,
    pub events: &'a EventBus,
}

pub trait PostFunctionHandler: Send + Sync {
    fn function_type(&self) -> &str;

    fn execute(
        &self,
        function: &PostFunction,
        ctx: &PostFunctionContext<'_>,
    ) -> impl Future<Output = Result<Option<PostFunctionEffect>, HandlerError>> + Send;
}

/// Object-safe version of [`PostFunctionHandler`] with boxed futures.
pub trait PostFunctionHandlerDyn: Send + Sync {
    fn function_type(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        function: &'a PostFunction,
        ctx: &'a PostFunctionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PostFunctionEffect>, HandlerError>> + Send + 'a>>;
}

impl<T: PostFunctionHandler> PostFunctionHandlerDyn for T {
    fn function_type(&self) -> &str {
        PostFunctionHandler::function_type(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        function: &'a PostFunction,
        ctx: &'a PostFunctionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PostFunctionEffect>, HandlerError>> + Send + 'a>>
    {
        Box::pin(self.execute(function, ctx))
    }
}

#[derive(Clone, Default)]
pub struct PostFunctionTable {
    handlers: HashMap<String, Arc<dyn PostFunctionHandlerDyn>>,
}

impl PostFunctionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register(SetField);
        table.register(SetStatusField);
        table.register(Reassign);
        table.register(NotifyWatchers);
        table
    }

    pub fn register<H: PostFunctionHandler + 'static>(&mut self, handler: H) {
        let handler: Arc<dyn PostFunctionHandlerDyn> = Arc::new(handler);
        self.handlers
            .insert(handler.function_type().to_string(), handler);
    }

    pub fn get(&self, function_type: &str) -> Option<Arc<dyn PostFunctionHandlerDyn>> {
        self.handlers.get(function_type).cloned()
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for PostFunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostFunctionTable")
            .field("types", &self.types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn required<'f>(function: &'f PostFunction, key: &str) -> Result<&'f str, HandlerError> {
    function
        .param(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| HandlerError::MissingParameter(key.to_string()))
}

/// `field` := `value` (string).
pub struct SetField;

impl PostFunctionHandler for SetField {
    fn function_type(&self) -> &str {
        "set_field"
    }

    async fn execute(
        &self,
        function: &PostFunction,
        _ctx: &PostFunctionContext<'_>,
    ) -> Result<Option<PostFunctionEffect>, HandlerError> {
        let field = required(function, "field")?;
        let value = function.param("value").unwrap_or_default();
        Ok(Some(PostFunctionEffect::SetField {
            field: field.to_string(),
            value: Value::String(value.to_string()),
        }))
    }
}

/// Writes the target status name into `field` (default `status`).
pub struct SetStatusField;

impl PostFunctionHandler for SetStatusField {
    fn function_type(&self) -> &str {
        "set_status_field"
    }

    async fn execute(
        &self,
        function: &PostFunction,
        ctx: &PostFunctionContext<'_>,
    ) -> Result<Option<PostFunctionEffect>, HandlerError> {
        let field = function.param("field").unwrap_or("status");
        Ok(Some(PostFunctionEffect::SetField {
            field: field.to_string(),
            value: Value::String(ctx.to_status.name.clone()),
        }))
    }
}

/// `assignee = <id>`, or `to = actor | unassigned`.
pub struct Reassign;

impl PostFunctionHandler for Reassign {
    fn function_type(&self) -> &str {
        "reassign"
    }

    async fn execute(
        &self,
        function: &PostFunction,
        ctx: &PostFunctionContext<'_>,
    ) -> Result<Option<PostFunctionEffect>, HandlerError> {
        let assignee = match (function.param("assignee"), function.param("to")) {
            (Some(id), _) if !id.trim().is_empty() => Some(id.trim().to_string()),
            (_, Some("actor")) => Some(ctx.actor.id.clone()),
            (_, Some("unassigned")) => None,
            (_, Some(other)) => {
                return Err(HandlerError::InvalidParameter {
                    name: "to".to_string(),
                    reason: format!("expected 'actor' or 'unassigned', got '{other}'"),
                });
            }
            (_, None) => return Err(HandlerError::MissingParameter("assignee".to_string())),
        };
        Ok(Some(PostFunctionEffect::Reassign { assignee }))
    }
}

/// Publishes `WatchersNotified` (`audience` default `watchers`, optional `message`).
pub struct NotifyWatchers;

impl PostFunctionHandler for NotifyWatchers {
    fn function_type(&self) -> &str {
        "notify_watchers"
    }

    async fn execute(
        &self,
        function: &PostFunction,
        ctx: &PostFunctionContext<'_>,
    ) -> Result<Option<PostFunctionEffect>, HandlerError> {
        let audience = function.param("audience").unwrap_or("watchers").to_string();
        let message = function.param("message").map(str::to_string).unwrap_or_else(|| {
            format!(
                "{} moved {} from '{}' to '{}'",
                ctx.actor.id, ctx.execution.entity_id, ctx.from_status.name, ctx.to_status.name
            )
        });
        let delivered = ctx.events.publish(WorkflowEvent::WatchersNotified {
            execution_ref: ctx.execution.execution_ref(),
            transition_id: ctx.transition.id.clone(),
            audience: audience.clone(),
            message,
        });
        tracing::debug!(%audience, delivered, "watchers notified");
        Ok(Some(PostFunctionEffect::Notified { audience }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowdesk_types::workflow::StatusCategory;
    use uuid::Uuid;

    fn status(id: &str, name: &str) -> Status {
        Status {
            id: id.to_string(),
            name: name.to_string(),
            category: StatusCategory::InProgress,
        }
    }

    async fn run(
        function: PostFunction,
        actor: &Actor,
        events: &EventBus,
    ) -> Result<Option<PostFunctionEffect>, HandlerError> {
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            organization_id: "acme".to_string(),
            workflow_id: Uuid::now_v7(),
            workflow_version: 1,
            entity_type: "ticket".to_string(),
            entity_id: "T-9".to_string(),
            current_status_id: "todo".to_string(),
            started_at: Utc::now(),
            completed_at: None,
        };
        let transition = Transition {
            id: "start".to_string(),
            name: "Start".to_string(),
            from_status_id: "todo".to_string(),
            to_status_id: "progress".to_string(),
            conditions: Vec::new(),
            post_functions: Vec::new(),
        };
        let from = status("todo", "To Do");
        let to = status("progress", "In Progress");
        let ctx = PostFunctionContext {
            actor,
            execution: &execution,
            transition: &transition,
            from_status: &from,
            to_status: &to,
            events,
        };
        let table = PostFunctionTable::builtin();
        let handler = table.get(&function.kind).expect("registered");
        handler.execute_boxed(&function, &ctx).await
    }

    #[tokio::test]
    async fn set_field_and_status_field() {
        let actor = Actor::new("alice");
        let bus = EventBus::new(4);

        let effect = run(
            PostFunction::new("set_field").with_param("field", "resolution").with_param("value", "Fixed"),
            &actor,
            &bus,
        )
        .await
        .unwrap();
        assert_eq!(
            effect,
            Some(PostFunctionEffect::SetField {
                field: "resolution".to_string(),
                value: Value::String("Fixed".to_string())
            })
        );

        let effect = run(PostFunction::new("set_status_field"), &actor, &bus).await.unwrap();
        assert_eq!(
            effect,
            Some(PostFunctionEffect::SetField {
                field: "status".to_string(),
                value: Value::String("In Progress".to_string())
            })
        );
    }

    #[tokio::test]
    async fn reassign_variants() {
        let actor = Actor::new("alice");
        let bus = EventBus::new(4);

        let to_actor = run(PostFunction::new("reassign").with_param("to", "actor"), &actor, &bus).await;
        assert_eq!(
            to_actor.unwrap(),
            Some(PostFunctionEffect::Reassign { assignee: Some("alice".to_string()) })
        );

        let cleared = run(PostFunction::new("reassign").with_param("to", "unassigned"), &actor, &bus).await;
        assert_eq!(cleared.unwrap(), Some(PostFunctionEffect::Reassign { assignee: None }));

        let bad = run(PostFunction::new("reassign").with_param("to", "team"), &actor, &bus).await;
        assert!(matches!(bad, Err(HandlerError::InvalidParameter { .. })));

        let missing = run(PostFunction::new("reassign"), &actor, &bus).await;
        assert!(matches!(missing, Err(HandlerError::MissingParameter(_))));
    }

    #[tokio::test]
    async fn notify_watchers_publishes_event() {
        let actor = Actor::new("alice");
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        let effect = run(PostFunction::new("notify_watchers"), &actor, &bus).await.unwrap();
        assert_eq!(
            effect,
            Some(PostFunctionEffect::Notified { audience: "watchers".to_string() })
        );
        match rx.recv().await.unwrap() {
            WorkflowEvent::WatchersNotified { message, transition_id, .. } => {
                assert_eq!(transition_id, "start");
                assert!(message.contains("In Progress"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
