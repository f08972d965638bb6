//! The agent loop.
//!
//! Each iteration streams one model completion, accumulating partial tool
//! calls by index. No tool calls ends the run with a `text_response`; a call
//! to the internal `idle` tool ends it with `idle`; otherwise every call is
//! dispatched through the tool executor, its output fed back as tool
//! messages, and the loop re-enters. A provider context-overflow error is
//! recovered at most once per run by compacting the working messages and
//! retrying the iteration.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kestrel_llm::{
    is_context_overflow, CompactionProvider, CompletionParams, LlmError, LlmProvider,
    SharedProvider,
};
use kestrel_tools::{parse_arguments, LocalHandler, ToolRegistry};
use kestrel_types::{
    AgentDone, AgentEvent, ChatCompletionChunk, DoneReason, Message, MessageContent, Role,
    StreamChunk, ToolCall, ToolCallFunction, ToolDefinition, ToolResultChunk,
};

use crate::error::{AgentError, Result};

/// Name of the internal termination tool.
pub const IDLE_TOOL_NAME: &str = "idle";

/// Default iteration safety bound.
const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// A lazy sequence of agent events.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Agent run parameters.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max tokens per completion.
    pub max_tokens: Option<u32>,
    /// Iteration safety bound.
    pub max_iterations: u32,
    /// System prompt prepended when the history has none.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// The agent: model provider + tool registry + loop policy.
pub struct Agent {
    provider: SharedProvider,
    tools: Arc<ToolRegistry>,
    compaction: Option<Arc<dyn CompactionProvider>>,
    config: AgentConfig,
}

impl Agent {
    /// Start building an agent.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The tool registry, including the injected `idle` tool.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run the loop on `messages`, streaming every event.
    ///
    /// Model output is forwarded as OpenAI-shape chunk events; tool output as
    /// `tool_result` events; each completed tool round additionally emits a
    /// `tool_messages` event. The stream ends with a single `agent_done` (or
    /// an `error` event on unrecovered failure).
    pub fn run(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        cancellation: CancellationToken,
    ) -> AgentEventStream {
        let provider = self.provider.clone();
        let tools = self.tools.clone();
        let compaction = self.compaction.clone();
        let config = self.config.clone();

        let model = model.unwrap_or_else(|| config.model.clone());
        let temperature = temperature.unwrap_or(config.temperature);
        let max_tokens = max_tokens.or(config.max_tokens);

        Box::pin(async_stream::stream! {
            let mut working = messages;

            // Prepend the system prompt unless the caller supplied one.
            if let Some(prompt) = &config.system_prompt {
                let has_system = working
                    .first()
                    .map(|m| m.role == Role::System)
                    .unwrap_or(false);
                if !has_system {
                    working.insert(0, Message::system(prompt.clone()));
                }
            }

            let tool_defs: Vec<ToolDefinition> = tools.definitions();
            let mut compaction_attempted = false;
            let mut iteration: u32 = 0;

            while iteration < config.max_iterations {
                if cancellation.is_cancelled() {
                    return;
                }

                let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
                let created = chrono::Utc::now().timestamp();

                let params = CompletionParams {
                    messages: working.clone(),
                    model: model.clone(),
                    temperature,
                    max_tokens,
                    stop: None,
                    tools: tool_defs.clone(),
                };

                tracing::debug!(
                    iteration,
                    messages = working.len(),
                    tools = tool_defs.len(),
                    model = %model,
                    "calling model"
                );

                // Consume the completion. Errors are stream values, so a
                // failure surfacing mid-stream is handled the same as one at
                // call time.
                let mut full_content = String::new();
                let mut accumulated: BTreeMap<usize, ToolCall> = BTreeMap::new();
                let mut forwarded_any = false;
                let mut failure: Option<LlmError> = None;

                match provider.stream_completion(params).await {
                    Err(e) => failure = Some(e),
                    Ok(mut chunks) => {
                        while let Some(item) = chunks.next().await {
                            if cancellation.is_cancelled() {
                                return;
                            }
                            let chunk = match item {
                                Ok(chunk) => chunk,
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            };

                            if let Some(text) = &chunk.content {
                                full_content.push_str(text);
                            }
                            if let Some(deltas) = &chunk.tool_calls {
                                for delta in deltas {
                                    let entry = accumulated
                                        .entry(delta.index)
                                        .or_insert_with(|| ToolCall {
                                            id: String::new(),
                                            call_type: "function".to_string(),
                                            function: ToolCallFunction {
                                                name: String::new(),
                                                arguments: String::new(),
                                                thought_signature: None,
                                            },
                                        });
                                    if let Some(id) = &delta.id {
                                        entry.id = id.clone();
                                    }
                                    if let Some(call_type) = &delta.call_type {
                                        entry.call_type = call_type.clone();
                                    }
                                    if let Some(function) = &delta.function {
                                        if let Some(name) = &function.name {
                                            entry.function.name = name.clone();
                                        }
                                        if let Some(arguments) = &function.arguments {
                                            entry.function.arguments.push_str(arguments);
                                        }
                                        if let Some(signature) = &function.thought_signature {
                                            entry.function.thought_signature =
                                                Some(signature.clone());
                                        }
                                    }
                                }
                            }

                            // Forward verbatim in OpenAI shape.
                            let finish_reason = chunk.finish_reason.clone();
                            let delta = StreamChunk {
                                role: chunk.role,
                                content: chunk.content,
                                tool_calls: chunk.tool_calls,
                                finish_reason: None,
                                model: None,
                                id: None,
                            };
                            forwarded_any = true;
                            yield AgentEvent::Chunk(ChatCompletionChunk::new(
                                &completion_id,
                                created,
                                &model,
                                delta,
                                finish_reason,
                            ));
                        }
                    }
                }

                if let Some(error) = failure {
                    // Context overflow is recovered at most once per run, and
                    // only when nothing from the failed call was forwarded.
                    let recoverable = is_context_overflow(&error)
                        && !compaction_attempted
                        && !forwarded_any;
                    match (&compaction, recoverable) {
                        (Some(compactor), true) => {
                            tracing::info!(error = %error, "context overflow, compacting");
                            let before = working.len();
                            match compactor
                                .compact(
                                    std::mem::take(&mut working),
                                    config.system_prompt.as_deref().unwrap_or(""),
                                    &model,
                                )
                                .await
                            {
                                Ok(compacted) => {
                                    tracing::info!(
                                        before,
                                        after = compacted.len(),
                                        "context compaction complete"
                                    );
                                    working = compacted;
                                    compaction_attempted = true;
                                    // Retry this iteration against the
                                    // compacted history.
                                    continue;
                                }
                                Err(compact_error) => {
                                    tracing::error!(
                                        error = %compact_error,
                                        "context compaction failed"
                                    );
                                    let err = AgentError::from(error);
                                    yield AgentEvent::Error {
                                        message: err.to_string(),
                                        error_type: err.type_name().to_string(),
                                    };
                                    return;
                                }
                            }
                        }
                        _ => {
                            let err = AgentError::from(error);
                            tracing::error!(iteration, error = %err, "model call failed");
                            yield AgentEvent::Error {
                                message: err.to_string(),
                                error_type: err.type_name().to_string(),
                            };
                            return;
                        }
                    }
                }

                let tool_calls: Vec<ToolCall> = accumulated.into_values().collect();

                // Plain text answer: the run is complete.
                if tool_calls.is_empty() {
                    yield AgentEvent::Done(AgentDone {
                        reason: DoneReason::TextResponse,
                        final_content: Some(full_content),
                        summary: None,
                        iteration,
                    });
                    return;
                }

                let assistant = Message::assistant_tool_calls(
                    (!full_content.is_empty()).then(|| MessageContent::Text(full_content.clone())),
                    tool_calls.clone(),
                );
                working.push(assistant.clone());
                let mut round_messages = vec![assistant];

                for call in &tool_calls {
                    let arguments = parse_arguments(&call.function.arguments);
                    let call_name = call.function.name.as_str();

                    if call_name == IDLE_TOOL_NAME {
                        let summary = arguments
                            .get("summary")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let payload = serde_json::json!({
                            "status": "idle",
                            "summary": summary,
                        })
                        .to_string();

                        working.push(Message::tool(payload.clone(), &call.id, call_name));

                        yield AgentEvent::ToolResult(ToolResultChunk {
                            tool_call_id: call.id.clone(),
                            tool_name: call_name.to_string(),
                            delta: payload,
                            is_complete: true,
                        });
                        yield AgentEvent::Done(AgentDone {
                            reason: DoneReason::Idle,
                            final_content: None,
                            summary: Some(summary),
                            iteration,
                        });
                        return;
                    }

                    tracing::debug!(tool = call_name, call_id = %call.id, "executing tool");

                    let mut result_content = String::new();
                    let mut chunks = tools.run_tool_stream(call_name, arguments, &call.id);
                    while let Some(chunk) = chunks.next().await {
                        if cancellation.is_cancelled() {
                            return;
                        }
                        result_content.push_str(&chunk.delta);
                        yield AgentEvent::ToolResult(chunk);
                    }

                    let tool_message = Message::tool(result_content, &call.id, call_name);
                    working.push(tool_message.clone());
                    round_messages.push(tool_message);
                }

                yield AgentEvent::ToolMessages {
                    messages: round_messages,
                };

                iteration += 1;
            }

            yield AgentEvent::Done(AgentDone {
                reason: DoneReason::MaxIterations,
                final_content: None,
                summary: None,
                iteration: config.max_iterations,
            });
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Agent`].
pub struct AgentBuilder {
    provider: Option<SharedProvider>,
    tools: ToolRegistry,
    compaction: Option<Arc<dyn CompactionProvider>>,
    config: AgentConfig,
}

impl AgentBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            compaction: None,
            config: AgentConfig::default(),
        }
    }

    /// Set the model provider.
    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the compaction provider.
    pub fn with_compaction(mut self, compaction: Arc<dyn CompactionProvider>) -> Self {
        self.compaction = Some(compaction);
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Set the iteration bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set default max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Build the agent, injecting the `idle` termination tool.
    pub fn build(mut self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("model provider is required".to_string()))?;

        let idle = ToolDefinition::new(
            IDLE_TOOL_NAME,
            "Call this after using tools to signal you are done with your task. \
             Only needed after tool usage, not for simple text responses.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "Optional brief summary of what was accomplished"
                    }
                },
                "required": []
            }),
        );
        // The loop intercepts idle before dispatch; the handler only exists
        // so the definition is advertised like any other tool.
        let handler = LocalHandler::sync(|args| {
            let summary = args
                .get("summary")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            Ok(serde_json::json!({"status": "idle", "summary": summary}))
        });
        if let Err(e) = self.tools.register_local(idle, handler) {
            tracing::debug!(error = %e, "idle tool already registered");
        }

        Ok(Agent {
            provider,
            tools: Arc::new(self.tools),
            compaction: self.compaction,
            config: self.config,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kestrel_llm::{MockProvider, MockScript, TruncationCompaction};
    use kestrel_types::{FunctionDelta, ToolCallDelta};

    pub(crate) fn text_turn(parts: &[&str]) -> MockScript {
        let mut chunks = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            chunks.push(StreamChunk {
                role: (i == 0).then(|| "assistant".to_string()),
                content: Some(part.to_string()),
                ..Default::default()
            });
        }
        chunks.push(StreamChunk::finish("stop"));
        MockScript::Chunks(chunks)
    }

    pub(crate) fn tool_call_turn(id: &str, name: &str, arguments: &str) -> MockScript {
        // The call arrives split across two deltas, as real providers stream.
        let (head, tail) = arguments.split_at(arguments.len() / 2);
        MockScript::Chunks(vec![
            StreamChunk {
                role: Some("assistant".to_string()),
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some(id.to_string()),
                    call_type: Some("function".to_string()),
                    function: Some(FunctionDelta {
                        name: Some(name.to_string()),
                        arguments: Some(head.to_string()),
                        thought_signature: None,
                    }),
                }]),
                ..Default::default()
            },
            StreamChunk {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    call_type: None,
                    function: Some(FunctionDelta {
                        name: None,
                        arguments: Some(tail.to_string()),
                        thought_signature: None,
                    }),
                }]),
                ..Default::default()
            },
            StreamChunk::finish("tool_calls"),
        ])
    }

    pub(crate) async fn collect(mut stream: AgentEventStream) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    fn agent_with(scripts: Vec<MockScript>, tools: ToolRegistry) -> Agent {
        Agent::builder()
            .with_provider(Arc::new(MockProvider::new(scripts)))
            .with_tools(tools)
            .build()
            .unwrap()
    }

    fn weather_tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register_local(
                ToolDefinition::new(
                    "get_weather",
                    "Get the weather",
                    serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}}),
                ),
                LocalHandler::stream(|_args| {
                    futures::stream::iter(vec!["Tokyo: ".to_string(), "sunny".to_string()])
                }),
            )
            .unwrap();
        tools
    }

    #[tokio::test]
    async fn test_pure_text_run() {
        let agent = agent_with(vec![text_turn(&["Hel", "lo"])], ToolRegistry::new());
        let events = collect(agent.run(
            vec![Message::user("hi")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        // Two content chunks, one finish chunk, one done.
        assert_eq!(events.len(), 4);
        match &events[0] {
            AgentEvent::Chunk(chunk) => {
                let delta = chunk.delta().unwrap();
                assert_eq!(delta.role.as_deref(), Some("assistant"));
                assert_eq!(delta.content.as_deref(), Some("Hel"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        match &events[3] {
            AgentEvent::Done(done) => {
                assert_eq!(done.reason, DoneReason::TextResponse);
                assert_eq!(done.final_content.as_deref(), Some("Hello"));
                assert_eq!(done.iteration, 0);
            }
            other => panic!("expected done, got {other:?}"),
        }
        // agent_done is the last event of the run.
        assert!(events[..3].iter().all(|e| !e.is_done()));
    }

    #[tokio::test]
    async fn test_single_tool_then_idle() {
        let agent = agent_with(
            vec![
                tool_call_turn("c1", "get_weather", r#"{"location":"Tokyo"}"#),
                tool_call_turn("c2", "idle", r#"{"summary":"done"}"#),
            ],
            weather_tools(),
        );

        let events = collect(agent.run(
            vec![Message::user("weather in tokyo?")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        // Tool result events for c1: two deltas plus the sentinel.
        let c1: Vec<&ToolResultChunk> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult(chunk) if chunk.tool_call_id == "c1" => Some(chunk),
                _ => None,
            })
            .collect();
        assert_eq!(c1.len(), 3);
        assert_eq!(c1[0].delta, "Tokyo: ");
        assert_eq!(c1[1].delta, "sunny");
        assert!(c1[2].is_complete);

        // One idle tool_result with the status payload.
        let c2: Vec<&ToolResultChunk> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult(chunk) if chunk.tool_call_id == "c2" => Some(chunk),
                _ => None,
            })
            .collect();
        assert_eq!(c2.len(), 1);
        assert!(c2[0].is_complete);
        let payload: serde_json::Value = serde_json::from_str(&c2[0].delta).unwrap();
        assert_eq!(payload["status"], "idle");
        assert_eq!(payload["summary"], "done");

        // Terminal event.
        match events.last().unwrap() {
            AgentEvent::Done(done) => {
                assert_eq!(done.reason, DoneReason::Idle);
                assert_eq!(done.summary.as_deref(), Some("done"));
                assert_eq!(done.iteration, 1);
            }
            other => panic!("expected done, got {other:?}"),
        }

        // Every tool_result id was introduced earlier by a tool-call delta.
        for chunk in events.iter().filter_map(|e| match e {
            AgentEvent::ToolResult(c) => Some(c),
            _ => None,
        }) {
            let introduced = events.iter().any(|e| match e {
                AgentEvent::Chunk(c) => c
                    .delta()
                    .and_then(|d| d.tool_calls.as_ref())
                    .is_some_and(|calls| {
                        calls.iter().any(|tc| tc.id.as_deref() == Some(&chunk.tool_call_id))
                    }),
                _ => false,
            });
            assert!(introduced, "tool_result {} without prior delta", chunk.tool_call_id);
        }
    }

    #[tokio::test]
    async fn test_tool_round_emits_tool_messages() {
        let agent = agent_with(
            vec![
                tool_call_turn("c1", "get_weather", r#"{"location":"Tokyo"}"#),
                text_turn(&["warm out there"]),
            ],
            weather_tools(),
        );

        let events = collect(agent.run(
            vec![Message::user("weather?")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        let rounds: Vec<&Vec<Message>> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolMessages { messages } => Some(messages),
                _ => None,
            })
            .collect();
        assert_eq!(rounds.len(), 1);
        let round = rounds[0];
        assert_eq!(round.len(), 2);
        assert!(round[0].has_tool_calls());
        assert_eq!(round[1].role, Role::Tool);
        assert_eq!(round[1].text(), "Tokyo: sunny");
    }

    #[tokio::test]
    async fn test_max_iterations_bound() {
        let scripts = (0..5)
            .map(|i| tool_call_turn(&format!("c{i}"), "get_weather", "{}"))
            .collect();
        let agent = Agent::builder()
            .with_provider(Arc::new(MockProvider::new(scripts)))
            .with_tools(weather_tools())
            .with_max_iterations(3)
            .build()
            .unwrap();

        let events = collect(agent.run(
            vec![Message::user("loop forever")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        match events.last().unwrap() {
            AgentEvent::Done(done) => {
                assert_eq!(done.reason, DoneReason::MaxIterations);
                assert_eq!(done.iteration, 3);
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_context_overflow_compacts_and_retries() {
        let provider = Arc::new(MockProvider::new(vec![
            MockScript::CallError(
                "prompt is too long: 220000 tokens > 200000 maximum".to_string(),
            ),
            text_turn(&["ok"]),
        ]));
        let agent = Agent::builder()
            .with_provider(provider.clone())
            .with_compaction(Arc::new(TruncationCompaction::new().with_keep_count(2)))
            .build()
            .unwrap();

        let messages: Vec<Message> =
            (0..20).map(|i| Message::user(format!("m{i}"))).collect();
        let events = collect(agent.run(messages, None, None, None, CancellationToken::new())).await;

        // No error event; the run completed normally after one retry.
        assert!(events
            .iter()
            .all(|e| !matches!(e, AgentEvent::Error { .. })));
        match events.last().unwrap() {
            AgentEvent::Done(done) => {
                assert_eq!(done.reason, DoneReason::TextResponse);
                assert_eq!(done.final_content.as_deref(), Some("ok"));
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert_eq!(provider.call_count(), 2);
        // The retried call went out with the compacted history.
        assert!(provider.requests()[1].messages.len() <= 2);
    }

    #[tokio::test]
    async fn test_second_overflow_propagates() {
        let overflow = "prompt is too long: 220000 tokens > 200000 maximum".to_string();
        let provider = Arc::new(MockProvider::new(vec![
            MockScript::CallError(overflow.clone()),
            MockScript::CallError(overflow),
        ]));
        let agent = Agent::builder()
            .with_provider(provider)
            .with_compaction(Arc::new(TruncationCompaction::new()))
            .build()
            .unwrap();

        let events = collect(agent.run(
            vec![Message::user("hi")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        match events.last().unwrap() {
            AgentEvent::Error { error_type, .. } => {
                assert_eq!(error_type, "LLMProviderError");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflow_without_compactor_errors() {
        let provider = Arc::new(MockProvider::new(vec![MockScript::CallError(
            "context_length_exceeded".to_string(),
        )]));
        let agent = Agent::builder().with_provider(provider).build().unwrap();

        let events = collect(agent.run(
            vec![Message::user("hi")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;
        assert!(matches!(events.last(), Some(AgentEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_abort_run() {
        let mut tools = ToolRegistry::new();
        tools
            .register_local(
                ToolDefinition::new("flaky", "fails", serde_json::json!({"type": "object"})),
                LocalHandler::sync(|_args| Err("backend unavailable".to_string())),
            )
            .unwrap();

        let agent = agent_with(
            vec![
                tool_call_turn("c1", "flaky", "{}"),
                tool_call_turn("c2", "idle", "{}"),
            ],
            tools,
        );

        let events = collect(agent.run(
            vec![Message::user("try it")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        // The failure surfaced as an error chunk, then the run continued to
        // a clean idle termination.
        let error_chunk = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolResult(chunk) if chunk.tool_call_id == "c1" => Some(chunk),
                _ => None,
            })
            .unwrap();
        assert!(error_chunk.delta.starts_with("Error: "));
        assert!(error_chunk.is_complete);
        assert!(matches!(events.last(), Some(AgentEvent::Done(d)) if d.reason == DoneReason::Idle));
    }

    #[tokio::test]
    async fn test_system_prompt_prepended_once() {
        let provider = Arc::new(MockProvider::new(vec![
            text_turn(&["hi"]),
            text_turn(&["hi again"]),
        ]));
        let agent = Agent::builder()
            .with_provider(provider.clone())
            .with_system_prompt("be helpful")
            .build()
            .unwrap();

        let _ = collect(agent.run(
            vec![Message::user("hello")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;
        let _ = collect(agent.run(
            vec![Message::system("custom"), Message::user("hello")],
            None,
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        let requests = provider.requests();
        assert_eq!(requests[0].messages[0], Message::system("be helpful"));
        // A caller-supplied system message wins.
        assert_eq!(requests[1].messages[0], Message::system("custom"));
    }

    #[tokio::test]
    async fn test_thought_signature_survives_round() {
        // One synthesized chunk, Gemini style: complete call with signature.
        let provider = Arc::new(MockProvider::new(vec![
            MockScript::Chunks(vec![
                StreamChunk {
                    role: Some("assistant".to_string()),
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("c1".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(FunctionDelta {
                            name: Some("get_weather".to_string()),
                            arguments: Some(r#"{"location":"Tokyo"}"#.to_string()),
                            thought_signature: Some("sig-bytes==".to_string()),
                        }),
                    }]),
                    finish_reason: Some("tool_calls".to_string()),
                    ..Default::default()
                },
            ]),
            tool_call_turn("c2", "idle", "{}"),
        ]));

        let agent = Agent::builder()
            .with_provider(provider.clone())
            .with_tools(weather_tools())
            .build()
            .unwrap();

        let events = collect(agent.run(
            vec![Message::user("weather?")],
            Some("gemini-2.5-pro".to_string()),
            None,
            None,
            CancellationToken::new(),
        ))
        .await;

        let round = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::ToolMessages { messages } => Some(messages),
                _ => None,
            })
            .unwrap();
        let call = &round[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.thought_signature.as_deref(), Some("sig-bytes=="));

        // And the next model call carried it back verbatim.
        let followup = &provider.requests()[1];
        let assistant = followup
            .messages
            .iter()
            .find(|m| m.has_tool_calls())
            .unwrap();
        assert_eq!(
            assistant.tool_calls.as_ref().unwrap()[0]
                .function
                .thought_signature
                .as_deref(),
            Some("sig-bytes==")
        );
    }

    #[tokio::test]
    async fn test_idle_tool_advertised() {
        let agent = agent_with(vec![], ToolRegistry::new());
        assert!(agent.tools().contains(IDLE_TOOL_NAME));
    }
}
