//! Streaming chunk shapes.
//!
//! [`StreamChunk`] is what the model provider yields while a completion is in
//! flight; [`ToolResultChunk`] is what the tool executor yields while a tool
//! runs. Both are deliberately thin so the agent loop can forward them
//! without copying.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ─────────────────────────────────────────────────────────────────────────────
// Provider chunks
// ─────────────────────────────────────────────────────────────────────────────

/// Partial function payload inside a streamed tool-call delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionDelta {
    /// Tool name, usually present only on the first delta of a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument fragment to append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Opaque provider token, preserved verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// A partial tool call inside a stream chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolCallDelta {
    /// Accumulator slot this delta merges into.
    pub index: usize,
    /// Call id, last write wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Always `"function"` when present.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Partial function payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// A single streaming chunk from the model provider.
///
/// Any subset of fields may be present; the agent loop merges them into its
/// per-iteration accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StreamChunk {
    /// Role, present on the first chunk of a completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Partial tool-call deltas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// Why the completion stopped, present on the last chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Model that produced the chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Completion id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StreamChunk {
    /// A chunk carrying only a text delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A chunk carrying only a finish reason.
    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool definitions & results
// ─────────────────────────────────────────────────────────────────────────────

/// A tool definition as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON-Schema object describing the parameters.
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// OpenAI function-tool shape: `{"type":"function","function":{...}}`.
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// One streamed piece of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolResultChunk {
    /// Id of the tool call this chunk answers.
    pub tool_call_id: String,
    /// Name of the executing tool.
    pub tool_name: String,
    /// Output fragment; may be empty on the final chunk.
    pub delta: String,
    /// True on the last chunk of a call.
    pub is_complete: bool,
}

impl ToolResultChunk {
    /// A partial output chunk.
    pub fn partial(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        delta: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            delta: delta.into(),
            is_complete: false,
        }
    }

    /// The terminating sentinel chunk.
    pub fn complete(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            delta: String::new(),
            is_complete: true,
        }
    }

    /// A terminal error chunk. The delta begins with `Error: `.
    pub fn error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            delta: format!("Error: {message}"),
            is_complete: true,
        }
    }
}

/// Collected result of a full (non-streaming) tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolResult {
    /// Whether the tool ran successfully.
    pub success: bool,
    /// Output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Name of the tool.
    pub tool_name: String,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            tool_name: tool_name.into(),
        }
    }

    /// A failed result.
    pub fn err(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            tool_name: tool_name.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_openai_shape() {
        let def = ToolDefinition::new(
            "get_weather",
            "Get the weather",
            serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        );
        let v = def.to_openai();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "get_weather");
        assert!(v["function"]["parameters"]["properties"]["location"].is_object());
    }

    #[test]
    fn test_chunk_optional_fields_absent() {
        let chunk = StreamChunk::text("hi");
        let json = serde_json::to_string(&chunk).unwrap();
        assert_eq!(json, r#"{"content":"hi"}"#);
    }

    #[test]
    fn test_tool_call_delta_parse() {
        let json = r#"{"index":0,"id":"c1","type":"function","function":{"name":"run","arguments":"{\"x\":"}}"#;
        let delta: ToolCallDelta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.index, 0);
        assert_eq!(delta.id.as_deref(), Some("c1"));
        assert_eq!(
            delta.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"x\":")
        );
    }

    #[test]
    fn test_result_chunk_constructors() {
        let c = ToolResultChunk::partial("c1", "shell", "out");
        assert!(!c.is_complete);

        let c = ToolResultChunk::complete("c1", "shell");
        assert!(c.is_complete);
        assert!(c.delta.is_empty());

        let c = ToolResultChunk::error("c1", "shell", "boom");
        assert!(c.is_complete);
        assert!(c.delta.starts_with("Error: "));
    }
}
