//! Thread sessions: agent runs with persistent history.
//!
//! A [`ThreadSession`] loads a thread's history, sanitizes it, runs the
//! agent, and re-assembles durable messages from the observed event stream:
//! assistant messages from OpenAI-shape chunks (deep-merged tool-call deltas,
//! `thought_signature` preserved), tool messages from accumulated
//! `tool_result` events.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use kestrel_store::{SharedStore, ThreadStore};
use kestrel_types::{
    AgentEvent, DoneReason, Message, MessageContent, Role, ToolCall, ToolCallFunction,
};

use crate::agent::{Agent, AgentEventStream};
use crate::sanitize::sanitize_messages;

/// One thread bound to one agent.
pub struct ThreadSession {
    agent: Arc<Agent>,
    store: SharedStore,
    thread_id: String,
}

impl ThreadSession {
    /// Create a session for a thread.
    pub fn new(agent: Arc<Agent>, store: SharedStore, thread_id: impl Into<String>) -> Self {
        Self {
            agent,
            store,
            thread_id: thread_id.into(),
        }
    }

    /// The thread id.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Run the agent over the thread history plus `new_messages`.
    ///
    /// Events stream through unchanged. When `save_to_thread` is set, new
    /// user/system messages are saved up front and the assistant/tool
    /// messages reconstructed from the stream are saved once the run ends.
    pub fn run_with_thread(
        &self,
        new_messages: Vec<Message>,
        model: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        save_to_thread: bool,
        cancellation: CancellationToken,
    ) -> AgentEventStream {
        let agent = self.agent.clone();
        let store = self.store.clone();
        let thread_id = self.thread_id.clone();

        Box::pin(async_stream::stream! {
            // Ensure the thread exists.
            match store.thread_exists(&thread_id).await {
                Ok(false) => {
                    if let Err(e) = store.create_thread(Some(&thread_id), None, None, None).await {
                        tracing::error!(thread_id = %thread_id, error = %e, "failed to create thread");
                        yield AgentEvent::Error {
                            message: e.to_string(),
                            error_type: "StoreError".to_string(),
                        };
                        return;
                    }
                }
                Ok(true) => {}
                Err(e) => {
                    yield AgentEvent::Error {
                        message: e.to_string(),
                        error_type: "StoreError".to_string(),
                    };
                    return;
                }
            }

            // History + new messages, sanitized for the provider.
            let history = match store.get_thread_messages(&thread_id, None, true).await {
                Ok(history) => history,
                Err(e) => {
                    yield AgentEvent::Error {
                        message: e.to_string(),
                        error_type: "StoreError".to_string(),
                    };
                    return;
                }
            };

            let mut all_messages = history;
            all_messages.extend(new_messages.iter().cloned());
            let all_messages = sanitize_messages(all_messages);

            // New user/system messages are durable immediately.
            if save_to_thread {
                for msg in &new_messages {
                    if matches!(msg.role, Role::User | Role::System) {
                        if let Err(e) = store.add_message(&thread_id, msg).await {
                            tracing::warn!(thread_id = %thread_id, error = %e, "failed to save input message");
                        }
                    }
                }
            }

            let mut events = agent.run(all_messages, model, temperature, max_tokens, cancellation);

            let mut to_save: Vec<Message> = Vec::new();
            let mut assistant_content = String::new();
            let mut assistant_calls: BTreeMap<usize, ToolCall> = BTreeMap::new();
            let mut tool_buffers: std::collections::HashMap<String, (String, String)> =
                std::collections::HashMap::new();
            let mut final_content = String::new();

            while let Some(event) = events.next().await {
                if save_to_thread {
                    observe(
                        &event,
                        &mut assistant_content,
                        &mut assistant_calls,
                        &mut tool_buffers,
                        &mut final_content,
                        &mut to_save,
                    );
                }
                yield event;
            }

            if !save_to_thread {
                return;
            }

            if let Err(e) = store.add_messages(&thread_id, &to_save).await {
                tracing::error!(thread_id = %thread_id, error = %e, "failed to persist run messages");
            }

            // Save the terminal text unless an identical assistant message
            // was already captured this run. Content equality can in theory
            // collide with human-authored text; acceptable here.
            let already_saved = to_save.iter().any(|m| {
                m.role == Role::Assistant && m.text() == final_content
            });
            if !final_content.is_empty() && !already_saved {
                if let Err(e) = store
                    .add_message(&thread_id, &Message::assistant(final_content.clone()))
                    .await
                {
                    tracing::error!(thread_id = %thread_id, error = %e, "failed to persist final content");
                }
            }
        })
    }
}

/// Fold one observed event into the persistence accumulators.
fn observe(
    event: &AgentEvent,
    assistant_content: &mut String,
    assistant_calls: &mut BTreeMap<usize, ToolCall>,
    tool_buffers: &mut std::collections::HashMap<String, (String, String)>,
    final_content: &mut String,
    to_save: &mut Vec<Message>,
) {
    match event {
        AgentEvent::ToolResult(chunk) => {
            let entry = tool_buffers
                .entry(chunk.tool_call_id.clone())
                .or_insert_with(|| (chunk.tool_name.clone(), String::new()));
            entry.1.push_str(&chunk.delta);

            if chunk.is_complete {
                if let Some((name, content)) = tool_buffers.remove(&chunk.tool_call_id) {
                    to_save.push(Message::tool(content, &chunk.tool_call_id, name));
                }
            }
        }
        AgentEvent::Chunk(chunk) => {
            let Some(choice) = chunk.choices.first() else {
                return;
            };

            if let Some(content) = &choice.delta.content {
                assistant_content.push_str(content);
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    let entry = assistant_calls.entry(delta.index).or_insert_with(|| ToolCall {
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
                    if let Some(function) = &delta.function {
                        if let Some(name) = &function.name {
                            entry.function.name = name.clone();
                        }
                        if let Some(arguments) = &function.arguments {
                            entry.function.arguments.push_str(arguments);
                        }
                        if let Some(signature) = &function.thought_signature {
                            entry.function.thought_signature = Some(signature.clone());
                        }
                    }
                }
            }

            match choice.finish_reason.as_deref() {
                Some("tool_calls") => {
                    let calls: Vec<ToolCall> =
                        std::mem::take(assistant_calls).into_values().collect();
                    let content = std::mem::take(assistant_content);
                    to_save.push(Message::assistant_tool_calls(
                        (!content.is_empty()).then(|| MessageContent::Text(content)),
                        calls,
                    ));
                }
                Some("stop") if !assistant_content.is_empty() => {
                    let content = std::mem::take(assistant_content);
                    to_save.push(Message::assistant(content));
                }
                _ => {}
            }
        }
        AgentEvent::Done(done) => {
            if done.reason == DoneReason::TextResponse {
                if let Some(content) = &done.final_content {
                    *final_content = content.clone();
                }
            }
        }
        AgentEvent::ToolMessages { .. } | AgentEvent::Error { .. } => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{collect, text_turn, tool_call_turn};
    use crate::agent::IDLE_TOOL_NAME;
    use kestrel_llm::MockProvider;
    use kestrel_store::{LocalStore, ThreadStore};
    use kestrel_tools::{LocalHandler, ToolRegistry};
    use kestrel_types::ToolDefinition;

    fn weather_tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register_local(
                ToolDefinition::new(
                    "get_weather",
                    "Get the weather",
                    serde_json::json!({"type": "object", "properties": {}}),
                ),
                LocalHandler::sync(|_args| Ok(serde_json::Value::String("sunny".to_string()))),
            )
            .unwrap();
        tools
    }

    fn session(
        scripts: Vec<kestrel_llm::MockScript>,
        tools: ToolRegistry,
        store: SharedStore,
        thread_id: &str,
    ) -> ThreadSession {
        let agent = Agent::builder()
            .with_provider(Arc::new(MockProvider::new(scripts)))
            .with_tools(tools)
            .build()
            .unwrap();
        ThreadSession::new(Arc::new(agent), store, thread_id)
    }

    #[tokio::test]
    async fn test_text_run_persists_user_and_assistant() {
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        let session = session(
            vec![text_turn(&["Hel", "lo"])],
            ToolRegistry::new(),
            store.clone(),
            "t1",
        );

        let _ = collect(session.run_with_thread(
            vec![Message::user("hi")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        let saved = store.get_thread_messages("t1", None, true).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].role, Role::User);
        assert_eq!(saved[1].role, Role::Assistant);
        assert_eq!(saved[1].text(), "Hello");
    }

    #[tokio::test]
    async fn test_final_content_saved_once() {
        // finish_reason "stop" with content saves the assistant message; the
        // agent_done final_content must not duplicate it.
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        let session = session(
            vec![text_turn(&["Hello"])],
            ToolRegistry::new(),
            store.clone(),
            "t1",
        );

        let _ = collect(session.run_with_thread(
            vec![Message::user("hi")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        let saved = store.get_thread_messages("t1", None, true).await.unwrap();
        let assistants: Vec<_> = saved.iter().filter(|m| m.role == Role::Assistant).collect();
        assert_eq!(assistants.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_run_persists_full_round() {
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        let session = session(
            vec![
                tool_call_turn("c1", "get_weather", r#"{"location":"Tokyo"}"#),
                tool_call_turn("c2", IDLE_TOOL_NAME, r#"{"summary":"done"}"#),
            ],
            weather_tools(),
            store.clone(),
            "t1",
        );

        let _ = collect(session.run_with_thread(
            vec![Message::user("weather?")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        let saved = store.get_thread_messages("t1", None, true).await.unwrap();
        // user, assistant(c1), tool(c1), assistant(c2), tool(c2 idle)
        assert_eq!(saved.len(), 5);
        assert_eq!(saved[0].role, Role::User);
        assert!(saved[1].has_tool_calls());
        assert_eq!(
            saved[1].tool_calls.as_ref().unwrap()[0].function.name,
            "get_weather"
        );
        assert_eq!(saved[2].role, Role::Tool);
        assert_eq!(saved[2].text(), "sunny");
        assert!(saved[3].has_tool_calls());
        assert_eq!(saved[4].tool_call_id.as_deref(), Some("c2"));

        // The saved set is sanitizer-clean.
        let sanitized = sanitize_messages(saved.clone());
        assert_eq!(sanitized, saved);
    }

    #[tokio::test]
    async fn test_replay_equals_working_set() {
        // Running again over the saved thread reconstructs the same history
        // the loop ended with, modulo ids and timestamps.
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        let session = session(
            vec![
                tool_call_turn("c1", "get_weather", "{}"),
                tool_call_turn("c2", IDLE_TOOL_NAME, "{}"),
                text_turn(&["again"]),
            ],
            weather_tools(),
            store.clone(),
            "t1",
        );

        let _ = collect(session.run_with_thread(
            vec![Message::user("weather?")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        let replayed = store.get_thread_messages("t1", None, true).await.unwrap();
        assert_eq!(sanitize_messages(replayed.clone()), replayed);

        // A follow-up run consumes the replayed history without error.
        let events = collect(session.run_with_thread(
            vec![Message::user("and now?")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;
        assert!(events.iter().any(|e| e.is_done()));
    }

    #[tokio::test]
    async fn test_thread_created_on_first_use() {
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        assert!(!store.thread_exists("fresh").await.unwrap());

        let session = session(
            vec![text_turn(&["hi"])],
            ToolRegistry::new(),
            store.clone(),
            "fresh",
        );
        let _ = collect(session.run_with_thread(
            vec![Message::user("hello")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        assert!(store.thread_exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_disabled_persists_nothing() {
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        let session = session(
            vec![text_turn(&["hi"])],
            ToolRegistry::new(),
            store.clone(),
            "t1",
        );

        let _ = collect(session.run_with_thread(
            vec![Message::user("hello")],
            None,
            None,
            None,
            false,
            CancellationToken::new(),
        ))
        .await;

        assert!(store
            .get_thread_messages("t1", None, true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_orphan_history_sanitized_before_model() {
        let store: SharedStore = Arc::new(LocalStore::open_in_memory().unwrap());
        store.create_thread(Some("t1"), None, None, None).await.unwrap();
        // An orphan tool message left by an interrupted run.
        store
            .add_message("t1", &Message::tool("stale", "ghost-call", "get_weather"))
            .await
            .unwrap();

        let provider = Arc::new(MockProvider::new(vec![text_turn(&["hi"])]));
        let agent = Agent::builder()
            .with_provider(provider.clone())
            .build()
            .unwrap();
        let session = ThreadSession::new(Arc::new(agent), store, "t1");

        let _ = collect(session.run_with_thread(
            vec![Message::user("hello")],
            None,
            None,
            None,
            true,
            CancellationToken::new(),
        ))
        .await;

        // The provider never saw the orphan.
        let request = &provider.requests()[0];
        assert!(request.messages.iter().all(|m| m.role != Role::Tool));
    }
}
