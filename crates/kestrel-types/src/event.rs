//! Agent event stream types.
//!
//! The agent loop yields [`AgentEvent`] values. Model output travels as raw
//! OpenAI `chat.completion.chunk` objects; tool output and loop lifecycle
//! travel as typed side-channel events distinguished by a `type` field.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::message::Message;
use crate::stream::{StreamChunk, ToolResultChunk};

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI chunk envelope
// ─────────────────────────────────────────────────────────────────────────────

/// The delta object inside a chunk choice.
pub type ChunkDelta = StreamChunk;

/// A single choice inside a `chat.completion.chunk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChunkChoice {
    /// Choice index, always 0 for this runtime.
    pub index: usize,
    /// The delta for this chunk.
    pub delta: ChunkDelta,
    /// Present on the final chunk of a completion.
    pub finish_reason: Option<String>,
}

/// An OpenAI-shape streaming chunk as forwarded to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChunk {
    /// Completion id (`chatcmpl-...`), stable for one model turn.
    pub id: String,
    /// Always `"chat.completion.chunk"`.
    pub object: String,
    /// Unix timestamp of the turn start.
    pub created: i64,
    /// Model identifier.
    pub model: String,
    /// Chunk choices.
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// Wrap a delta into the standard single-choice envelope.
    pub fn new(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        delta: ChunkDelta,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// The delta of the first (only) choice.
    pub fn delta(&self) -> Option<&ChunkDelta> {
        self.choices.first().map(|c| &c.delta)
    }

    /// The finish reason of the first choice, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent done
// ─────────────────────────────────────────────────────────────────────────────

/// Why an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The model called the `idle` tool.
    Idle,
    /// The model answered with plain text and no tool calls.
    TextResponse,
    /// The safety bound on loop iterations was reached.
    MaxIterations,
}

/// The terminal event of an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentDone {
    /// Termination cause.
    pub reason: DoneReason,
    /// Final text, set for `text_response`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    /// Idle summary, set for `idle`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Zero-based iteration the run ended on.
    pub iteration: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent event
// ─────────────────────────────────────────────────────────────────────────────

/// An event emitted by the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A model chunk in OpenAI shape, forwarded verbatim.
    Chunk(ChatCompletionChunk),
    /// A streamed piece of tool output.
    ToolResult(ToolResultChunk),
    /// Assistant-with-tool-calls plus tool messages from one loop round, in
    /// model-compatible shape.
    ToolMessages {
        /// The round's messages in order.
        messages: Vec<Message>,
    },
    /// The run finished.
    Done(AgentDone),
    /// An unexpected failure, always followed by stream termination.
    Error {
        /// Human-readable message.
        message: String,
        /// Error category name.
        error_type: String,
    },
}

impl AgentEvent {
    /// Serialize to the wire JSON object of §external-interface.
    ///
    /// `Chunk` serializes as the bare OpenAI object; the side-channel events
    /// carry a `type` discriminator.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Chunk(chunk) => serde_json::to_value(chunk).unwrap_or_default(),
            Self::ToolResult(chunk) => serde_json::json!({
                "type": "tool_result",
                "tool_call_id": chunk.tool_call_id,
                "tool_name": chunk.tool_name,
                "delta": chunk.delta,
                "is_complete": chunk.is_complete,
            }),
            Self::ToolMessages { messages } => serde_json::json!({
                "type": "tool_messages",
                "messages": messages,
            }),
            Self::Done(done) => {
                let mut v = serde_json::json!({
                    "type": "agent_done",
                    "reason": done.reason,
                    "iteration": done.iteration,
                });
                if let Some(content) = &done.final_content {
                    v["final_content"] = serde_json::Value::String(content.clone());
                }
                if let Some(summary) = &done.summary {
                    v["summary"] = serde_json::Value::String(summary.clone());
                }
                v
            }
            Self::Error {
                message,
                error_type,
            } => serde_json::json!({
                "type": "error",
                "message": message,
                "error": error_type,
            }),
        }
    }

    /// True for the terminal `Done` event.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

impl Serialize for AgentEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_event_serializes_bare() {
        let chunk = ChatCompletionChunk::new(
            "chatcmpl-1",
            1700000000,
            "gpt-4o",
            ChunkDelta::text("Hel"),
            None,
        );
        let v = AgentEvent::Chunk(chunk).to_value();
        assert_eq!(v["object"], "chat.completion.chunk");
        assert_eq!(v["choices"][0]["delta"]["content"], "Hel");
        assert!(v.get("type").is_none());
    }

    #[test]
    fn test_tool_result_event_shape() {
        let v = AgentEvent::ToolResult(ToolResultChunk::partial("c1", "get_weather", "sunny"))
            .to_value();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["tool_call_id"], "c1");
        assert_eq!(v["is_complete"], false);
    }

    #[test]
    fn test_done_event_reasons() {
        let v = AgentEvent::Done(AgentDone {
            reason: DoneReason::TextResponse,
            final_content: Some("Hello".to_string()),
            summary: None,
            iteration: 0,
        })
        .to_value();
        assert_eq!(v["type"], "agent_done");
        assert_eq!(v["reason"], "text_response");
        assert_eq!(v["final_content"], "Hello");
        assert!(v.get("summary").is_none());

        let v = AgentEvent::Done(AgentDone {
            reason: DoneReason::MaxIterations,
            final_content: None,
            summary: None,
            iteration: 50,
        })
        .to_value();
        assert_eq!(v["reason"], "max_iterations");
        assert_eq!(v["iteration"], 50);
    }

    #[test]
    fn test_error_event_shape() {
        let v = AgentEvent::Error {
            message: "boom".to_string(),
            error_type: "LLMProviderError".to_string(),
        }
        .to_value();
        assert_eq!(v["type"], "error");
        assert_eq!(v["error"], "LLMProviderError");
    }
}
