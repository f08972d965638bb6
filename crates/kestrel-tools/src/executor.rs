//! Streaming tool execution.
//!
//! `run_tool_stream` adapts every tool kind to the same contract: zero or
//! more delta chunks, then exactly one `is_complete` sentinel. Failures never
//! escape as errors; they become a terminal chunk whose delta begins with
//! `Error: `, so the agent loop can feed them back to the model and continue.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kestrel_mcp::McpClient;
use kestrel_sandbox::{SandboxHandle, SharedHandle};
use kestrel_types::{ToolResult, ToolResultChunk};

use crate::handler::{render_output, LocalHandler};
use crate::registry::{ToolKind, ToolRegistry};

/// A lazy sequence of tool output chunks.
pub type ToolChunkStream = Pin<Box<dyn Stream<Item = ToolResultChunk> + Send + 'static>>;

/// Parse model-generated arguments leniently.
///
/// Tool arguments usually arrive as a JSON string; an empty or unparseable
/// string yields an empty argument map rather than an error.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl ToolRegistry {
    /// Execute a tool, streaming its output.
    ///
    /// The returned stream always terminates with a single
    /// `is_complete = true` chunk.
    pub fn run_tool_stream(
        &self,
        name: &str,
        arguments: Value,
        tool_call_id: &str,
    ) -> ToolChunkStream {
        let call_id = tool_call_id.to_string();
        let tool = name.to_string();

        let Some(entry) = self.get(name) else {
            let chunk =
                ToolResultChunk::error(call_id, tool.clone(), format!("Tool not found: {tool}"));
            return Box::pin(futures::stream::iter(vec![chunk]));
        };

        match &entry.kind {
            ToolKind::Local(handler) => {
                local_stream(handler.clone(), tool, call_id, arguments)
            }
            ToolKind::Sandbox {
                handle,
                health_timeout,
            } => sandbox_stream(handle.clone(), *health_timeout, tool, call_id, arguments),
            ToolKind::Mcp { client } => mcp_stream(
                client.clone(),
                self.broadcast_pipe().cloned(),
                tool,
                call_id,
                arguments,
            ),
        }
    }

    /// Execute a tool and collect its full output.
    pub async fn run_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(entry) = self.get(name) else {
            return ToolResult::err(name, format!("Tool not found: {name}"));
        };

        match &entry.kind {
            ToolKind::Local(handler) => match invoke_local(handler, arguments).await {
                Ok(value) => ToolResult::ok(name, value),
                Err(message) => ToolResult::err(name, message),
            },
            ToolKind::Sandbox { .. } | ToolKind::Mcp { .. } => {
                let mut stream = self.run_tool_stream(name, arguments, "collect");
                let mut content = String::new();
                let mut failed = false;
                while let Some(chunk) = stream.next().await {
                    if chunk.is_complete && chunk.delta.starts_with("Error: ") {
                        failed = true;
                    }
                    content.push_str(&chunk.delta);
                }
                if failed {
                    ToolResult::err(name, content)
                } else {
                    ToolResult::ok(name, Value::String(content))
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local
// ─────────────────────────────────────────────────────────────────────────────

async fn invoke_local(
    handler: &LocalHandler,
    arguments: Value,
) -> std::result::Result<Value, String> {
    match handler {
        LocalHandler::Sync(f) => f(arguments),
        LocalHandler::Async(f) => f(arguments).await,
        LocalHandler::Stream(f) => {
            let fragments: Vec<String> = f(arguments).collect().await;
            Ok(Value::String(fragments.concat()))
        }
    }
}

fn local_stream(
    handler: LocalHandler,
    tool: String,
    call_id: String,
    arguments: Value,
) -> ToolChunkStream {
    Box::pin(async_stream::stream! {
        match handler {
            LocalHandler::Stream(f) => {
                let mut fragments = f(arguments);
                while let Some(fragment) = fragments.next().await {
                    yield ToolResultChunk::partial(&call_id, &tool, fragment);
                }
                yield ToolResultChunk::complete(&call_id, &tool);
            }
            LocalHandler::Async(f) => match f(arguments).await {
                Ok(value) => {
                    yield ToolResultChunk::partial(&call_id, &tool, render_output(&value));
                    yield ToolResultChunk::complete(&call_id, &tool);
                }
                Err(message) => {
                    yield ToolResultChunk::error(&call_id, &tool, message);
                }
            },
            LocalHandler::Sync(f) => match f(arguments) {
                Ok(value) => {
                    yield ToolResultChunk::partial(&call_id, &tool, render_output(&value));
                    yield ToolResultChunk::complete(&call_id, &tool);
                }
                Err(message) => {
                    yield ToolResultChunk::error(&call_id, &tool, message);
                }
            },
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────────────────────────────────────

fn sandbox_stream(
    handle: SharedHandle,
    health_timeout: Duration,
    tool: String,
    call_id: String,
    arguments: Value,
) -> ToolChunkStream {
    Box::pin(async_stream::stream! {
        // Tools block here until the sandbox is live; with a lazy handle this
        // also covers resolution of the real sandbox.
        if let Err(e) = handle.health_wait(Some(health_timeout)).await {
            yield ToolResultChunk::error(&call_id, &tool, e);
            return;
        }

        let mut events = match handle.run_tool(&tool, arguments).await {
            Ok(events) => events,
            Err(e) => {
                yield ToolResultChunk::error(&call_id, &tool, e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !event.data.is_empty() {
                        yield ToolResultChunk::partial(&call_id, &tool, &event.data);
                    }
                    if event.is_complete {
                        break;
                    }
                }
                Err(e) => {
                    yield ToolResultChunk::error(&call_id, &tool, e);
                    return;
                }
            }
        }

        yield ToolResultChunk::complete(&call_id, &tool);
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────────────────────────────────────

fn mcp_stream(
    client: Arc<McpClient>,
    broadcast_pipe: Option<PathBuf>,
    tool: String,
    call_id: String,
    arguments: Value,
) -> ToolChunkStream {
    Box::pin(async_stream::stream! {
        let arguments = if arguments.is_null() {
            None
        } else {
            Some(arguments)
        };

        let pipe = broadcast_pipe.filter(|path| is_fifo(path));
        let Some(pipe) = pipe else {
            // No broadcaster pipe: the full result arrives as one chunk.
            match client.call_tool_text(&tool, arguments).await {
                Ok(text) => {
                    if !text.is_empty() {
                        yield ToolResultChunk::partial(&call_id, &tool, text);
                    }
                    yield ToolResultChunk::complete(&call_id, &tool);
                }
                Err(e) => {
                    yield ToolResultChunk::error(&call_id, &tool, e);
                }
            }
            return;
        };

        // Read incremental output from the pipe while the call runs.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let done = CancellationToken::new();
        let reader = tokio::spawn(read_broadcast_pipe(pipe, tx, done.clone()));

        let mut call = Box::pin(client.call_tool_text(&tool, arguments));
        let mut streamed_any = false;
        let mut rx_open = true;

        enum Step {
            Fragment(String),
            RxClosed,
            Finished(kestrel_mcp::Result<String>),
        }

        let result = loop {
            let step = if rx_open {
                tokio::select! {
                    fragment = rx.recv() => match fragment {
                        Some(fragment) => Step::Fragment(fragment),
                        None => Step::RxClosed,
                    },
                    result = &mut call => Step::Finished(result),
                }
            } else {
                Step::Finished((&mut call).await)
            };

            match step {
                Step::Fragment(fragment) => {
                    streamed_any = true;
                    yield ToolResultChunk::partial(&call_id, &tool, fragment);
                }
                Step::RxClosed => {
                    rx_open = false;
                }
                Step::Finished(result) => break result,
            }
        };

        done.cancel();
        let _ = reader.await;

        // Drain whatever the pipe delivered before the call finished.
        while let Ok(fragment) = rx.try_recv() {
            streamed_any = true;
            yield ToolResultChunk::partial(&call_id, &tool, fragment);
        }

        match result {
            Ok(text) => {
                if !streamed_any && !text.is_empty() {
                    yield ToolResultChunk::partial(&call_id, &tool, text);
                }
                yield ToolResultChunk::complete(&call_id, &tool);
            }
            Err(e) => {
                yield ToolResultChunk::error(&call_id, &tool, e);
            }
        }
    })
}

#[cfg(unix)]
fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_fifo(_path: &Path) -> bool {
    false
}

/// Read newline-delimited JSON from the broadcaster FIFO, forwarding each
/// message's `delta.content` until cancelled.
#[cfg(unix)]
async fn read_broadcast_pipe(
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
    done: CancellationToken,
) {
    use std::io::Read;
    use std::os::unix::fs::OpenOptionsExt;

    #[cfg(target_os = "macos")]
    const O_NONBLOCK: i32 = 0x0004;
    #[cfg(not(target_os = "macos"))]
    const O_NONBLOCK: i32 = 0o4000;

    let mut file = match std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(O_NONBLOCK)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot open broadcast pipe");
            return;
        }
    };

    let mut buffer = String::new();
    let mut chunk = [0u8; 4096];

    while !done.is_cancelled() {
        match file.read(&mut chunk) {
            Ok(0) => {
                // No writer attached yet.
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(n) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(message) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };
                    if let Some(content) = message
                        .pointer("/delta/content")
                        .and_then(Value::as_str)
                    {
                        if tx.send(content.to_string()).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "broadcast pipe read failed");
                return;
            }
        }
    }
}

#[cfg(not(unix))]
async fn read_broadcast_pipe(
    _path: PathBuf,
    _tx: mpsc::UnboundedSender<String>,
    _done: CancellationToken,
) {
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::ToolDefinition;
    use serde_json::json;

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "test", json!({"type": "object", "properties": {}}))
    }

    async fn collect(mut stream: ToolChunkStream) -> Vec<ToolResultChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_parse_arguments_lenient() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("not json"), json!({}));
        assert_eq!(
            parse_arguments(r#"{"location":"Tokyo"}"#),
            json!({"location": "Tokyo"})
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_single_error_chunk() {
        let registry = ToolRegistry::new();
        let chunks = collect(registry.run_tool_stream("ghost", json!({}), "c1")).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert!(chunks[0].delta.starts_with("Error: Tool not found"));
        assert_eq!(chunks[0].tool_call_id, "c1");
    }

    #[tokio::test]
    async fn test_sync_tool_one_chunk_and_sentinel() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(
                definition("get_weather"),
                LocalHandler::sync(|args| {
                    let location = args
                        .get("location")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Ok(Value::String(format!("{location}: sunny")))
                }),
            )
            .unwrap();

        let chunks = collect(registry.run_tool_stream(
            "get_weather",
            json!({"location": "Tokyo"}),
            "c1",
        ))
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta, "Tokyo: sunny");
        assert!(!chunks[0].is_complete);
        assert!(chunks[1].is_complete);
        assert!(chunks[1].delta.is_empty());
    }

    #[tokio::test]
    async fn test_stream_tool_forwards_fragments() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(
                definition("tail"),
                LocalHandler::stream(|_args| {
                    futures::stream::iter(vec!["Tokyo: ".to_string(), "sunny".to_string()])
                }),
            )
            .unwrap();

        let chunks = collect(registry.run_tool_stream("tail", json!({}), "c1")).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].delta, "Tokyo: ");
        assert_eq!(chunks[1].delta, "sunny");
        assert!(chunks[2].is_complete);
    }

    #[tokio::test]
    async fn test_async_tool_error_becomes_chunk() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(
                definition("flaky"),
                LocalHandler::async_fn(|_args| async { Err("backend unavailable".to_string()) }),
            )
            .unwrap();

        let chunks = collect(registry.run_tool_stream("flaky", json!({}), "c1")).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert_eq!(chunks[0].delta, "Error: backend unavailable");
    }

    #[tokio::test]
    async fn test_run_tool_collects_local() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(
                definition("count"),
                LocalHandler::sync(|_args| Ok(json!({"count": 3}))),
            )
            .unwrap();

        let result = registry.run_tool("count", json!({})).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["count"], 3);

        let missing = registry.run_tool("ghost", json!({})).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));
    }

    mod sandbox_kind {
        use super::*;
        use async_trait::async_trait;
        use kestrel_sandbox::{
            HealthStatus, SandboxError, SandboxHandle, SandboxState, ToolEvent, ToolEventStream,
        };
        use std::sync::Arc;

        /// Handle whose health wait either resolves after a short delay or
        /// times out, mirroring a lazy handle over background provisioning.
        struct FakeSandbox {
            resolves: bool,
        }

        #[async_trait]
        impl SandboxHandle for FakeSandbox {
            fn id(&self) -> String {
                "sb-test".to_string()
            }

            fn environment_id(&self) -> String {
                "env-test".to_string()
            }

            fn state(&self) -> SandboxState {
                SandboxState::Running
            }

            async fn health_status(&self) -> Option<HealthStatus> {
                None
            }

            async fn health_wait(
                &self,
                _timeout: Option<Duration>,
            ) -> kestrel_sandbox::Result<()> {
                if self.resolves {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                } else {
                    Err(SandboxError::ResolveTimeout {
                        thread_id: "t1".to_string(),
                    })
                }
            }

            async fn run_tool(
                &self,
                _tool_name: &str,
                _arguments: Value,
            ) -> kestrel_sandbox::Result<ToolEventStream> {
                let events = vec![
                    Ok(ToolEvent {
                        event_type: "output".to_string(),
                        data: "line one\n".to_string(),
                        is_complete: false,
                        exit_code: None,
                        metadata: Value::Null,
                    }),
                    Ok(ToolEvent {
                        event_type: "complete".to_string(),
                        data: String::new(),
                        is_complete: true,
                        exit_code: Some(0),
                        metadata: Value::Null,
                    }),
                ];
                Ok(Box::pin(futures::stream::iter(events)))
            }

            async fn claim(&self, _config: Value) -> kestrel_sandbox::Result<Value> {
                Ok(Value::Null)
            }

            async fn stop(&self) {}
        }

        fn registry_with(resolves: bool) -> ToolRegistry {
            let mut registry = ToolRegistry::new();
            registry
                .register_sandbox(
                    definition("shell"),
                    Arc::new(FakeSandbox { resolves }),
                    Duration::from_secs(30),
                )
                .unwrap();
            registry
        }

        #[tokio::test]
        async fn test_waits_for_health_then_streams() {
            let registry = registry_with(true);
            let chunks = collect(registry.run_tool_stream("shell", json!({}), "c1")).await;

            assert_eq!(chunks.len(), 2);
            assert_eq!(chunks[0].delta, "line one\n");
            assert!(chunks[1].is_complete);
        }

        #[tokio::test]
        async fn test_health_timeout_is_single_error_chunk() {
            let registry = registry_with(false);
            let chunks = collect(registry.run_tool_stream("shell", json!({}), "c1")).await;

            assert_eq!(chunks.len(), 1);
            assert!(chunks[0].is_complete);
            assert!(chunks[0].delta.starts_with("Error: "));
            assert!(chunks[0].delta.contains("timed out"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_is_fifo_detection() {
        let dir = tempfile::tempdir().unwrap();
        let regular = dir.path().join("regular.txt");
        std::fs::write(&regular, "x").unwrap();
        assert!(!is_fifo(&regular));
        assert!(!is_fifo(&dir.path().join("missing")));
    }
}
