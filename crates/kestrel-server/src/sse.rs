//! SSE encoding for agent event streams.
//!
//! Every payload is a `data: <json>` line; completion is signalled by
//! `data: [DONE]`.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::sse::KeepAliveStream;
use futures::StreamExt;

use kestrel_agent::AgentEventStream;
use kestrel_types::AgentEvent;

/// The SSE response type all streaming handlers share.
pub type EventStream =
    Sse<KeepAliveStream<futures::stream::BoxStream<'static, Result<Event, Infallible>>>>;

/// Encode an agent event stream as SSE.
///
/// `include_tool_messages` controls whether `tool_messages` events are
/// forwarded: the chat-completions paths carry them, the agent-run paths do
/// not. The stream always ends with `[DONE]`, even after an error event.
pub fn agent_events_to_sse(events: AgentEventStream, include_tool_messages: bool) -> EventStream {
    let stream = async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            if !include_tool_messages
                && matches!(event, AgentEvent::ToolMessages { .. })
            {
                continue;
            }
            yield Ok(event_to_sse(&event));
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream.boxed()).keep_alive(KeepAlive::default())
}

fn event_to_sse(event: &AgentEvent) -> Event {
    match serde_json::to_string(&event.to_value()) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode SSE event");
            Event::default().data("{}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::ToolResultChunk;

    #[test]
    fn test_event_payload_shape() {
        let event = AgentEvent::ToolResult(ToolResultChunk::partial("c1", "shell", "ls"));
        let json = serde_json::to_string(&event.to_value()).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""tool_call_id":"c1""#));
    }
}
