//! The [`LlmProvider`] trait and its test double.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use kestrel_types::{Message, StreamChunk, ToolCall, ToolDefinition};

use crate::error::{LlmError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max tokens per completion.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
    /// Tools to advertise, in OpenAI function shape.
    pub tools: Vec<ToolDefinition>,
}

impl CompletionParams {
    /// Create params with defaults for the optional knobs.
    pub fn new(messages: Vec<Message>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            stop: None,
            tools: Vec::new(),
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the tool definitions.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// A full (non-streaming) completion response.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Response text, if any.
    pub content: Option<String>,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
    /// Model that answered.
    pub model: String,
    /// Completion id.
    pub id: Option<String>,
    /// Token usage, when reported.
    pub usage: Option<Usage>,
    /// Tool calls, if the model requested any.
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// A lazy sequence of streaming chunks. Errors are values so failures that
/// surface mid-stream reach the consumer without buffering.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A model provider the agent loop can drive.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start a streaming completion.
    async fn stream_completion(&self, params: CompletionParams) -> Result<ChunkStream>;

    /// Run a completion to completion and collect the response.
    async fn completion(&self, params: CompletionParams) -> Result<CompletionResponse>;

    /// Name of this provider, for logs and error wrapping.
    fn name(&self) -> &str;
}

/// A provider that can be shared across tasks.
pub type SharedProvider = Arc<dyn LlmProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock provider
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted provider turn for [`MockProvider`].
#[derive(Debug, Clone)]
pub enum MockScript {
    /// Yield these chunks, in order, then end the stream.
    Chunks(Vec<StreamChunk>),
    /// Fail the call before any chunk is produced.
    CallError(String),
    /// Yield the chunks, then fail mid-stream with the error.
    ChunksThenError(Vec<StreamChunk>, String),
}

/// Deterministic provider for tests.
///
/// Returns scripted turns in order and records every request it saw.
pub struct MockProvider {
    scripts: std::sync::Mutex<Vec<MockScript>>,
    requests: std::sync::Mutex<Vec<CompletionParams>>,
}

impl MockProvider {
    /// Create a mock with the given scripted turns.
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: std::sync::Mutex::new(scripts),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A mock that streams the given text in one chunk and stops.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![MockScript::Chunks(vec![
            StreamChunk {
                role: Some("assistant".to_string()),
                content: Some(text.into()),
                ..Default::default()
            },
            StreamChunk::finish("stop"),
        ])])
    }

    /// All requests made so far.
    pub fn requests(&self) -> Vec<CompletionParams> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_script(&self) -> Option<MockScript> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            None
        } else {
            Some(scripts.remove(0))
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn stream_completion(&self, params: CompletionParams) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(params);

        match self.next_script() {
            None => Err(LlmError::provider("mock", "no scripted responses left")),
            Some(MockScript::CallError(msg)) => Err(LlmError::provider("mock", msg)),
            Some(MockScript::Chunks(chunks)) => {
                let items: Vec<Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(MockScript::ChunksThenError(chunks, msg)) => {
                let mut items: Vec<Result<StreamChunk>> =
                    chunks.into_iter().map(Ok).collect();
                items.push(Err(LlmError::provider("mock", msg)));
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<CompletionResponse> {
        use futures::StreamExt;

        let model = params.model.clone();
        let mut stream = self.stream_completion(params).await?;

        let mut content = String::new();
        let mut finish_reason = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content {
                content.push_str(&text);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
        }

        Ok(CompletionResponse {
            content: (!content.is_empty()).then_some(content),
            finish_reason,
            model,
            id: None,
            usage: None,
            tool_calls: None,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_streams_text() {
        let provider = MockProvider::with_text("Hello");
        let params = CompletionParams::new(vec![Message::user("hi")], "test-model");

        let mut stream = provider.stream_completion(params).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let Some(c) = chunk.unwrap().content {
                text.push_str(&c);
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_exhausted() {
        let provider = MockProvider::new(vec![]);
        let params = CompletionParams::new(vec![Message::user("hi")], "m");
        assert!(provider.stream_completion(params).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_mid_stream_error() {
        let provider = MockProvider::new(vec![MockScript::ChunksThenError(
            vec![StreamChunk::text("partial")],
            "boom".to_string(),
        )]);
        let params = CompletionParams::new(vec![Message::user("hi")], "m");

        let mut stream = provider.stream_completion(params).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_mock_completion_collects() {
        let provider = MockProvider::with_text("Hello world");
        let params = CompletionParams::new(vec![Message::user("hi")], "m");
        let response = provider.completion(params).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello world"));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }
}
