//! OpenAI-compatible model gateway provider.
//!
//! The gateway multiplexes several upstream providers behind one
//! chat-completions endpoint. Requests carry an API key plus a per-family
//! *virtual key* header selecting the upstream credentials, and the gateway is
//! told not to enforce strict OpenAI field compliance so provider-specific
//! fields (notably `thought_signature`) survive the round-trip.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use kestrel_types::{
    Message, MessageContent, StreamChunk, ToolCall, ToolCallDelta, FunctionDelta, VirtualKeys,
    validate_messages,
};

use crate::error::{LlmError, Result};
use crate::family::ModelFamily;
use crate::normalize::{MAX_IMAGES, normalize_for_family, prune_images};
use crate::provider::{ChunkStream, CompletionParams, CompletionResponse, LlmProvider, Usage};

/// Default gateway base URL.
const DEFAULT_BASE_URL: &str = "https://api.portkey.ai/v1";

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Required max_tokens default for the Anthropic family.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for [`GatewayProvider`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway API key.
    pub api_key: String,
    /// Gateway base URL.
    pub base_url: String,
    /// Per-family virtual keys.
    pub virtual_keys: VirtualKeys,
    /// Fallback virtual key when no family key is configured.
    pub fallback_virtual_key: Option<String>,
    /// Optional gateway routing config id.
    pub config_id: Option<String>,
    /// Default model when a request does not name one.
    pub default_model: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Create a config with the given API key and defaults everywhere else.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            virtual_keys: VirtualKeys::default(),
            fallback_virtual_key: None,
            config_id: None,
            default_model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Read the config from `PORTKEY_*` / `DEFAULT_MODEL` environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("PORTKEY_API_KEY")
            .map_err(|_| LlmError::Config("PORTKEY_API_KEY not set".to_string()))?;

        let mut config = Self::new(api_key);
        config.fallback_virtual_key = std::env::var("PORTKEY_VIRTUAL_KEY").ok();
        config.config_id = std::env::var("PORTKEY_CONFIG").ok();
        if let Ok(model) = std::env::var("DEFAULT_MODEL") {
            config.default_model = model;
        }
        Ok(config)
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-family virtual keys.
    pub fn with_virtual_keys(mut self, keys: VirtualKeys) -> Self {
        self.virtual_keys = keys;
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// LLM provider backed by an OpenAI-compatible model gateway.
pub struct GatewayProvider {
    client: Client,
    config: GatewayConfig,
}

impl GatewayProvider {
    /// Create a provider with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create a provider from environment configuration.
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// The configured default model.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn build_request(
        &self,
        params: &CompletionParams,
        stream: bool,
    ) -> Result<(GatewayChatRequest, ModelFamily)> {
        validate_messages(&params.messages)?;

        let family = ModelFamily::infer(&params.model);
        if family == ModelFamily::Unknown {
            tracing::warn!(model = %params.model, "unknown model family, routing as openai");
        }

        let messages = prune_images(params.messages.clone(), MAX_IMAGES);
        let messages = normalize_for_family(messages, family);

        // Per-family parameter discipline.
        let mut max_tokens = params.max_tokens;
        let mut max_completion_tokens = None;
        if params.model.to_lowercase().starts_with("gpt-5") {
            max_completion_tokens = max_tokens.take();
        } else if family == ModelFamily::Anthropic {
            max_tokens = Some(max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS));
        }

        let tools: Option<Vec<serde_json::Value>> = if params.tools.is_empty() {
            None
        } else {
            Some(params.tools.iter().map(|t| t.to_openai()).collect())
        };

        Ok((
            GatewayChatRequest {
                model: params.model.clone(),
                messages,
                temperature: params.temperature,
                max_tokens,
                max_completion_tokens,
                stop: params.stop.clone(),
                stream,
                tools,
            },
            family,
        ))
    }

    async fn send(&self, body: &GatewayChatRequest, family: ModelFamily) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json")
            .header("x-portkey-api-key", &self.config.api_key)
            .header("x-portkey-strict-open-ai-compliance", "false");

        let virtual_key = family
            .select_virtual_key(&self.config.virtual_keys)
            .map(str::to_string)
            .or_else(|| self.config.fallback_virtual_key.clone());
        if let Some(key) = virtual_key {
            request = request.header("x-portkey-virtual-key", key);
        }
        if let Some(config_id) = &self.config.config_id {
            request = request.header("x-portkey-config", config_id);
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::provider("gateway", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GatewayErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.clone());
            return Err(LlmError::provider_status(
                "gateway",
                status.as_u16(),
                message,
                Some(body),
            ));
        }

        Ok(response)
    }

    /// Run a non-streaming completion and synthesize one chunk from it.
    ///
    /// Used for the Google family: its tool calls carry `thought_signature`
    /// in the function body, which only survives non-streaming responses.
    async fn complete_as_single_chunk(&self, params: &CompletionParams) -> Result<ChunkStream> {
        let response = self.completion_inner(params).await?;

        let tool_calls = response.tool_calls.map(|calls| {
            calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: Some(call.id),
                    call_type: Some(call.call_type),
                    function: Some(FunctionDelta {
                        name: Some(call.function.name),
                        arguments: Some(call.function.arguments),
                        thought_signature: call.function.thought_signature,
                    }),
                })
                .collect()
        });

        let chunk = StreamChunk {
            role: Some("assistant".to_string()),
            content: response.content,
            tool_calls,
            finish_reason: response.finish_reason,
            model: Some(response.model),
            id: response.id,
        };

        Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
    }

    async fn completion_inner(&self, params: &CompletionParams) -> Result<CompletionResponse> {
        let (body, family) = self.build_request(params, false)?;

        tracing::debug!(
            model = %body.model,
            family = family.as_str(),
            messages = body.messages.len(),
            tools = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "gateway completion"
        );

        let response = self.send(&body, family).await?;
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::provider("gateway", e.to_string()))?;
        let parsed: GatewayChatResponse = serde_json::from_str(&text)?;

        let choice = parsed.choices.into_iter().next();
        let (content, finish_reason, tool_calls) = match choice {
            Some(c) => (
                c.message.content.map(|content| content.to_text()),
                c.finish_reason,
                c.message.tool_calls,
            ),
            None => (None, None, None),
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            model: parsed.model.unwrap_or_else(|| params.model.clone()),
            id: parsed.id,
            usage: parsed.usage,
            tool_calls,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for GatewayProvider {
    async fn stream_completion(&self, params: CompletionParams) -> Result<ChunkStream> {
        let family = ModelFamily::infer(&params.model);

        // Gemini tool calls only carry thought signatures on non-streaming
        // responses; request one and hand back a single synthesized chunk.
        if family == ModelFamily::Google {
            return self.complete_as_single_chunk(&params).await;
        }

        let (body, family) = self.build_request(&params, true)?;

        tracing::debug!(
            model = %body.model,
            family = family.as_str(),
            messages = body.messages.len(),
            "gateway stream completion"
        );

        let response = self.send(&body, family).await?;
        Ok(parse_sse_stream(Box::pin(response.bytes_stream())))
    }

    async fn completion(&self, params: CompletionParams) -> Result<CompletionResponse> {
        self.completion_inner(&params).await
    }

    fn name(&self) -> &str {
        "gateway"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GatewayChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GatewayChatResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<GatewayChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct GatewayChoice {
    message: GatewayResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponseMessage {
    content: Option<MessageContent>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    error: GatewayErrorBody,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GatewayStreamChunk {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<GatewayStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct GatewayStreamChoice {
    delta: Option<GatewayStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayStreamDelta {
    role: Option<String>,
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE parsing
// ─────────────────────────────────────────────────────────────────────────────

struct SseState<S> {
    byte_stream: S,
    buffer: String,
    done: bool,
}

/// Parse an SSE byte stream of `data: <json>` lines into chunks.
///
/// `data: [DONE]` ends the stream; undecodable lines are skipped.
fn parse_sse_stream<S, E>(byte_stream: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream,
            buffer: String::new(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                // Drain complete lines already buffered.
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        state.done = true;
                        return None;
                    }

                    match serde_json::from_str::<GatewayStreamChunk>(data) {
                        Ok(wire) => {
                            let choice = wire.choices.into_iter().next();
                            let (delta, finish_reason) = match choice {
                                Some(c) => (c.delta, c.finish_reason),
                                None => (None, None),
                            };
                            let delta = delta.unwrap_or(GatewayStreamDelta {
                                role: None,
                                content: None,
                                tool_calls: None,
                            });
                            let chunk = StreamChunk {
                                role: delta.role,
                                content: delta.content,
                                tool_calls: delta.tool_calls,
                                finish_reason,
                                model: wire.model,
                                id: wire.id,
                            };
                            return Some((Ok(chunk), state));
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping undecodable SSE line");
                        }
                    }
                }

                // Pull more bytes.
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(LlmError::provider("gateway", e.to_string())),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        return None;
                    }
                }
            }
        },
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
