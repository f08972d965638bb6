//! HTTP request bodies accepted by the server.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::message::Message;

fn default_temperature() -> f32 {
    0.7
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    /// Model identifier; falls back to the server default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max tokens per completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether to stream; this server streams unless explicitly disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    /// True unless the caller asked for a collected response.
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

/// Request body for the agent-run endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentRunRequest {
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Model identifier; falls back to the server default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max tokens per completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Request body for thread creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateThreadRequest {
    /// Optional system message stored as the first thread message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Owning user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Agent profile id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka_profile_id: Option<String>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}
