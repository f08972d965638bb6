//! Thread management endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use kestrel_store::ThreadStore;
use kestrel_types::{CreateThreadRequest, Message};

use crate::error::ServerError;
use crate::state::AppState;

/// Response of thread creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateThreadResponse {
    /// The new thread id.
    pub thread_id: String,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Response listing a thread's messages.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadMessagesResponse {
    /// The thread id.
    pub thread_id: String,
    /// Messages in creation order.
    pub messages: Vec<Message>,
}

/// Response of appending a message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddMessageResponse {
    /// Whether the append succeeded.
    pub success: bool,
    /// Id of the stored message.
    pub message_id: String,
}

/// Response of clearing a thread.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteMessagesResponse {
    /// Whether the delete succeeded.
    pub success: bool,
    /// How many messages were removed.
    pub deleted_count: usize,
}

/// POST /v1/threads: create a thread.
#[utoipa::path(
    post,
    path = "/v1/threads",
    request_body = CreateThreadRequest,
    responses((status = 200, description = "Thread created", body = CreateThreadResponse)),
    tag = "threads"
)]
pub async fn create_thread_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateThreadRequest>,
) -> Result<Json<CreateThreadResponse>, ServerError> {
    let thread = state
        .store
        .create_thread(
            None,
            request.user_id.as_deref(),
            request.kafka_profile_id.as_deref(),
            request.system_message.as_deref(),
        )
        .await?;

    Ok(Json(CreateThreadResponse {
        thread_id: thread.id,
        created_at: thread.created_at,
    }))
}

/// GET /v1/threads/{thread_id}/messages: list a thread's messages.
#[utoipa::path(
    get,
    path = "/v1/threads/{thread_id}/messages",
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread messages", body = ThreadMessagesResponse),
        (status = 404, description = "Unknown thread"),
    ),
    tag = "threads"
)]
pub async fn get_messages_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadMessagesResponse>, ServerError> {
    if !state.store.thread_exists(&thread_id).await? {
        return Err(ServerError::NotFound(format!("thread {thread_id}")));
    }

    let messages = state.store.get_thread_messages(&thread_id, None, true).await?;
    Ok(Json(ThreadMessagesResponse {
        thread_id,
        messages,
    }))
}

/// POST /v1/threads/{thread_id}/messages: append a message.
#[utoipa::path(
    post,
    path = "/v1/threads/{thread_id}/messages",
    request_body = Message,
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Message stored", body = AddMessageResponse),
        (status = 404, description = "Unknown thread"),
    ),
    tag = "threads"
)]
pub async fn add_message_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(message): Json<Message>,
) -> Result<Json<AddMessageResponse>, ServerError> {
    if !state.store.thread_exists(&thread_id).await? {
        return Err(ServerError::NotFound(format!("thread {thread_id}")));
    }

    let message_id = state.store.add_message(&thread_id, &message).await?;
    Ok(Json(AddMessageResponse {
        success: true,
        message_id,
    }))
}

/// DELETE /v1/threads/{thread_id}/messages: clear a thread.
#[utoipa::path(
    delete,
    path = "/v1/threads/{thread_id}/messages",
    params(("thread_id" = String, Path, description = "Thread id")),
    responses((status = 200, description = "Messages deleted", body = DeleteMessagesResponse)),
    tag = "threads"
)]
pub async fn delete_messages_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<DeleteMessagesResponse>, ServerError> {
    let deleted_count = state.store.delete_thread_messages(&thread_id).await?;
    Ok(Json(DeleteMessagesResponse {
        success: true,
        deleted_count,
    }))
}
