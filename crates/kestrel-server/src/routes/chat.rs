//! OpenAI-compatible chat completion endpoints.
//!
//! Streaming responses interleave `chat.completion.chunk` objects with
//! `tool_result` and `tool_messages` events. With `"stream": false` the run
//! is collected into a single `chat.completion` response.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use kestrel_agent::AgentEventStream;
use kestrel_types::{AgentEvent, ChatCompletionRequest, DoneReason};

use crate::error::ServerError;
use crate::sse::agent_events_to_sse;
use crate::state::AppState;

/// A collected (non-streaming) chat completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionResponse {
    /// Completion id.
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp.
    pub created: i64,
    /// Model that answered.
    pub model: String,
    /// Single choice with the final message.
    pub choices: Vec<CompletionChoice>,
}

/// One choice of a collected completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionChoice {
    /// Choice index.
    pub index: usize,
    /// The final assistant message.
    pub message: CompletionMessage,
    /// Why the run ended.
    pub finish_reason: String,
}

/// The message of a collected completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionMessage {
    /// Always `"assistant"`.
    pub role: String,
    /// Final text.
    pub content: String,
}

/// POST /v1/chat/completions: stateless chat.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "SSE stream of completion chunks, or a collected completion"),
        (status = 400, description = "Malformed request"),
    ),
    tag = "chat"
)]
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".to_string()));
    }

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_model.clone());
    let events = state.agent.run(
        request.messages.clone(),
        Some(model.clone()),
        Some(request.temperature),
        request.max_tokens,
        CancellationToken::new(),
    );

    if request.wants_stream() {
        Ok(agent_events_to_sse(events, true).into_response())
    } else {
        let collected = collect_completion(events, &model).await?;
        Ok(Json(collected).into_response())
    }
}

/// POST /v1/threads/{thread_id}/chat/completions: chat with persistence.
#[utoipa::path(
    post,
    path = "/v1/threads/{thread_id}/chat/completions",
    request_body = ChatCompletionRequest,
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "SSE stream of completion chunks, persisted to the thread"),
        (status = 400, description = "Malformed request"),
    ),
    tag = "chat"
)]
pub async fn thread_chat_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ServerError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".to_string()));
    }

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_model.clone());
    let session = state.thread_session(&thread_id)?;
    let events = session.run_with_thread(
        request.messages.clone(),
        Some(model.clone()),
        Some(request.temperature),
        request.max_tokens,
        true,
        CancellationToken::new(),
    );

    if request.wants_stream() {
        Ok(agent_events_to_sse(events, true).into_response())
    } else {
        let collected = collect_completion(events, &model).await?;
        Ok(Json(collected).into_response())
    }
}

/// Drain an event stream into one `chat.completion` response.
async fn collect_completion(
    mut events: AgentEventStream,
    model: &str,
) -> Result<ChatCompletionResponse, ServerError> {
    let mut content = String::new();
    let mut finish_reason = "stop".to_string();

    while let Some(event) = events.next().await {
        match event {
            AgentEvent::Chunk(chunk) => {
                if let Some(delta) = chunk.delta() {
                    if let Some(text) = &delta.content {
                        content.push_str(text);
                    }
                }
            }
            AgentEvent::Done(done) => {
                match done.reason {
                    DoneReason::TextResponse => {
                        if let Some(final_content) = done.final_content {
                            content = final_content;
                        }
                    }
                    DoneReason::Idle => finish_reason = "stop".to_string(),
                    DoneReason::MaxIterations => finish_reason = "length".to_string(),
                }
            }
            AgentEvent::Error { message, .. } => {
                return Err(ServerError::Internal(message));
            }
            AgentEvent::ToolResult(_) | AgentEvent::ToolMessages { .. } => {}
        }
    }

    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason,
        }],
    })
}
