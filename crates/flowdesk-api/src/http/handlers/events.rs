//! Live event feed over Server-Sent Events.
//!
//! GET /api/v1/events?organization_id=
//!
//! Relays every `WorkflowEvent` published on the bus. The SSE event name is
//! the event kind (`transition_applied`, `transition_rejected`,
//! `workflow_activated`, `watchers_notified`) and the data is the event as
//! JSON. A subscriber that falls behind receives a `lagged` event with the
//! number of events it missed.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;

use flowdesk_types::event::WorkflowEvent;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: &'static str,
    pub data: String,
}

fn organization_of(event: &WorkflowEvent) -> &str {
    match event {
        WorkflowEvent::TransitionApplied { execution_ref, .. }
        | WorkflowEvent::TransitionRejected { execution_ref, .. }
        | WorkflowEvent::WatchersNotified { execution_ref, .. } => &execution_ref.organization_id,
        WorkflowEvent::WorkflowActivated { organization_id, .. } => organization_id,
    }
}

fn relay(mut rx: Receiver<WorkflowEvent>, organization_id: Option<String>) -> impl Stream<Item = Frame> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if organization_id.as_deref().is_some_and(|org| organization_of(&event) != org) {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Frame { name: event.kind(), data },
                        Err(e) => tracing::warn!("failed to serialize {} event: {e}", event.kind()),
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                    yield Frame {
                        name: "lagged",
                        data: serde_json::json!({ "missed": missed }).to_string(),
                    };
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// GET /api/v1/events
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(org = ?query.organization_id, "event subscriber connected");
    let frames = relay(state.events.subscribe(), query.organization_id);
    let events = frames.map(|frame| Ok::<_, Infallible>(Event::default().event(frame.name).data(frame.data)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
