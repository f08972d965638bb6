//! Shared types for the Kestrel agent runtime.
//!
//! This crate defines the canonical message shape, the streaming chunk shapes
//! exchanged between the model provider, the tool executor, and the agent
//! loop, plus the thread records used by the persistence layer.

pub mod event;
pub mod message;
pub mod stream;
pub mod thread;
pub mod wire;

pub use event::{AgentDone, AgentEvent, ChatCompletionChunk, ChunkChoice, ChunkDelta, DoneReason};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolCallFunction};
pub use stream::{
    FunctionDelta, StreamChunk, ToolCallDelta, ToolDefinition, ToolResult, ToolResultChunk,
};
pub use thread::{Thread, ThreadConfig, VirtualKeys};
pub use wire::{AgentRunRequest, ChatCompletionRequest, CreateThreadRequest};

/// Error for malformed input messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// The request carried no messages at all.
    #[error("message list is empty")]
    EmptyMessages,

    /// A message violated the well-formedness rules of its role.
    #[error("malformed message at index {index}: {reason}")]
    MalformedMessage {
        /// Position of the offending message.
        index: usize,
        /// Why it is malformed.
        reason: String,
    },
}

/// Validate a message list before handing it to a provider.
///
/// A message is well-formed iff: role=tool implies `tool_call_id` is set, and
/// an assistant message with tool calls has a non-empty id on every call.
pub fn validate_messages(messages: &[Message]) -> Result<(), ValidationError> {
    if messages.is_empty() {
        return Err(ValidationError::EmptyMessages);
    }

    for (index, msg) in messages.iter().enumerate() {
        if msg.role == Role::Tool && msg.tool_call_id.is_none() {
            return Err(ValidationError::MalformedMessage {
                index,
                reason: "tool message without tool_call_id".to_string(),
            });
        }
        if msg.role == Role::Assistant {
            if let Some(calls) = &msg.tool_calls {
                if calls.iter().any(|c| c.id.is_empty()) {
                    return Err(ValidationError::MalformedMessage {
                        index,
                        reason: "assistant tool call with empty id".to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty() {
        assert!(matches!(
            validate_messages(&[]),
            Err(ValidationError::EmptyMessages)
        ));
    }

    #[test]
    fn test_validate_tool_without_call_id() {
        let messages = vec![Message::user("hi"), Message {
            role: Role::Tool,
            content: Some(MessageContent::Text("out".into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];
        assert!(matches!(
            validate_messages(&messages),
            Err(ValidationError::MalformedMessage { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_ok() {
        let messages = vec![
            Message::system("be helpful"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        assert!(validate_messages(&messages).is_ok());
    }
}
