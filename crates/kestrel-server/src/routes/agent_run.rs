//! Agent-run endpoints.
//!
//! Same loop as the chat endpoints but the stream carries agent events only:
//! model chunks, `tool_result`, and `agent_done`, without the
//! `tool_messages` round summaries.

use axum::extract::{Path, State};
use axum::Json;
use tokio_util::sync::CancellationToken;

use kestrel_types::AgentRunRequest;

use crate::error::ServerError;
use crate::sse::{agent_events_to_sse, EventStream};
use crate::state::AppState;

/// POST /v1/agent/run: stateless agent run.
#[utoipa::path(
    post,
    path = "/v1/agent/run",
    request_body = AgentRunRequest,
    responses(
        (status = 200, description = "SSE stream of agent events"),
        (status = 400, description = "Malformed request"),
    ),
    tag = "agent"
)]
pub async fn agent_run_handler(
    State(state): State<AppState>,
    Json(request): Json<AgentRunRequest>,
) -> Result<EventStream, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".to_string()));
    }

    let events = state.agent.run(
        request.messages,
        request.model,
        Some(request.temperature),
        request.max_tokens,
        CancellationToken::new(),
    );
    Ok(agent_events_to_sse(events, false))
}

/// POST /v1/threads/{thread_id}/agent/run: agent run with persistence.
#[utoipa::path(
    post,
    path = "/v1/threads/{thread_id}/agent/run",
    request_body = AgentRunRequest,
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "SSE stream of agent events, persisted to the thread"),
        (status = 400, description = "Malformed request"),
    ),
    tag = "agent"
)]
pub async fn thread_agent_run_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(request): Json<AgentRunRequest>,
) -> Result<EventStream, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".to_string()));
    }

    let session = state.thread_session(&thread_id)?;
    let events = session.run_with_thread(
        request.messages,
        request.model,
        Some(request.temperature),
        request.max_tokens,
        true,
        CancellationToken::new(),
    );
    Ok(agent_events_to_sse(events, false))
}
