//! Sandbox handles.
//!
//! A handle fronts one remote VM running the tool-execution service on
//! port 8081: `GET /health`, `POST /run` (SSE), `POST /claim`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{Result, SandboxError};

/// Proxy host sandboxes are reachable through.
pub const PROXY_BASE: &str = "proxy.daytona.works";

/// Port of the in-sandbox tool service.
pub const DEFAULT_PORT: u16 = 8081;

/// Default timeout for health waits and `/run` requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Seconds between health polls.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Being created.
    Creating,
    /// Created, services starting.
    Starting,
    /// Healthy and serving.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
    /// Suspended by the platform.
    Paused,
    /// Unrecoverable.
    Error,
}

/// Parsed `/health` response.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Service reports itself healthy.
    pub healthy: bool,
    /// Sandbox has been claimed by a thread.
    pub claimed: bool,
    /// The raw response body.
    pub raw: Value,
}

impl HealthStatus {
    fn from_value(raw: Value) -> Self {
        Self {
            healthy: raw.get("healthy").and_then(Value::as_bool).unwrap_or(false),
            claimed: raw.get("claimed").and_then(Value::as_bool).unwrap_or(false),
            raw,
        }
    }
}

/// One SSE event from a `/run` stream.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    /// Event type: `output`, `error`, `status`, or `complete`.
    pub event_type: String,
    /// Event payload.
    pub data: String,
    /// True on the final event of an execution.
    pub is_complete: bool,
    /// Exit code, when the execution finished a process.
    pub exit_code: Option<i32>,
    /// Additional event metadata.
    pub metadata: Value,
}

/// Stream of `/run` events.
pub type ToolEventStream = Pin<Box<dyn Stream<Item = Result<ToolEvent>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// One remote sandbox VM.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Sandbox id.
    fn id(&self) -> String;

    /// Environment/snapshot id the sandbox was created from.
    fn environment_id(&self) -> String;

    /// Last known lifecycle state.
    fn state(&self) -> SandboxState;

    /// Fetch `/health`; `None` when the endpoint is unreachable.
    async fn health_status(&self) -> Option<HealthStatus>;

    /// Quick boolean health probe.
    async fn check_health(&self) -> bool {
        self.health_status()
            .await
            .is_some_and(|status| status.healthy)
    }

    /// Poll `/health` until it answers 200 or `timeout` elapses.
    async fn health_wait(&self, timeout: Option<Duration>) -> Result<()>;

    /// Execute a tool via `/run` and stream its SSE events.
    async fn run_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolEventStream>;

    /// POST a claim config to `/claim`.
    async fn claim(&self, config: Value) -> Result<Value>;

    /// Stop using this handle. Does not destroy the remote sandbox.
    async fn stop(&self);
}

/// A handle that can be shared across tasks.
pub type SharedHandle = Arc<dyn SandboxHandle>;

// ─────────────────────────────────────────────────────────────────────────────
// Remote handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a sandbox reachable through the proxy (or any direct URL).
pub struct RemoteSandbox {
    id: String,
    environment_id: String,
    base_url: String,
    state: Mutex<SandboxState>,
    client: reqwest::Client,
}

impl RemoteSandbox {
    /// Connect to a sandbox by id, assuming it is running until proven
    /// otherwise.
    pub fn connect(sandbox_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        let id = sandbox_id.into();
        let base_url = format!("https://{DEFAULT_PORT}-{id}.{PROXY_BASE}");
        Self::with_base_url(id, environment_id, base_url, SandboxState::Running)
    }

    /// Handle to a freshly created sandbox that is still starting.
    pub fn starting(sandbox_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        let id = sandbox_id.into();
        let base_url = format!("https://{DEFAULT_PORT}-{id}.{PROXY_BASE}");
        Self::with_base_url(id, environment_id, base_url, SandboxState::Starting)
    }

    /// Handle to a direct URL, for local development.
    pub fn direct(base_url: impl Into<String>) -> Self {
        Self::with_base_url("local", "local", base_url, SandboxState::Running)
    }

    fn with_base_url(
        id: impl Into<String>,
        environment_id: impl Into<String>,
        base_url: impl Into<String>,
        state: SandboxState,
    ) -> Self {
        Self {
            id: id.into(),
            environment_id: environment_id.into(),
            base_url: base_url.into(),
            state: Mutex::new(state),
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn set_state(&self, state: SandboxState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl SandboxHandle for RemoteSandbox {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn environment_id(&self) -> String {
        self.environment_id.clone()
    }

    fn state(&self) -> SandboxState {
        *self.state.lock().unwrap()
    }

    async fn health_status(&self) -> Option<HealthStatus> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let raw: Value = response.json().await.ok()?;
        Some(HealthStatus::from_value(raw))
    }

    async fn health_wait(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        self.set_state(SandboxState::Starting);

        let start = tokio::time::Instant::now();
        let mut last_error = String::from("connecting");
        let mut last_log = Duration::ZERO;

        tracing::info!(
            sandbox_id = %self.id,
            timeout_secs = timeout.as_secs(),
            "waiting for sandbox to become healthy"
        );

        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                self.set_state(SandboxState::Error);
                return Err(SandboxError::HealthTimeout {
                    sandbox_id: self.id.clone(),
                    timeout_secs: timeout.as_secs(),
                    last_error,
                });
            }

            if elapsed - last_log >= Duration::from_secs(5) {
                tracing::debug!(
                    sandbox_id = %self.id,
                    elapsed_secs = elapsed.as_secs(),
                    last = %last_error,
                    "still waiting for sandbox"
                );
                last_log = elapsed;
            }

            match self
                .client
                .get(format!("{}/health", self.base_url))
                .timeout(Duration::from_secs(10))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    self.set_state(SandboxState::Running);
                    tracing::info!(
                        sandbox_id = %self.id,
                        elapsed_secs = elapsed.as_secs(),
                        "sandbox healthy"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        }
    }

    async fn run_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolEventStream> {
        if self.state() != SandboxState::Running {
            return Err(SandboxError::run(
                self.id.clone(),
                format!("sandbox is not running (state: {:?})", self.state()),
            ));
        }

        let response = self
            .client
            .post(format!("{}/run", self.base_url))
            .header("accept", "text/event-stream")
            .json(&serde_json::json!({
                "tool_name": tool_name,
                "arguments": arguments,
            }))
            .send()
            .await
            .map_err(|e| SandboxError::run(self.id.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::run(
                self.id.clone(),
                format!("HTTP {status}: {body}"),
            ));
        }

        let sandbox_id = self.id.clone();
        let tool = tool_name.to_string();
        let mut bytes = Box::pin(response.bytes_stream());

        Ok(Box::pin(async_stream::stream! {
            let mut buffer = String::new();
            loop {
                // Drain complete lines first.
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        yield Ok(ToolEvent {
                            event_type: "complete".to_string(),
                            data: String::new(),
                            is_complete: true,
                            exit_code: None,
                            metadata: Value::Null,
                        });
                        return;
                    }

                    match serde_json::from_str::<Value>(data) {
                        Ok(parsed) => {
                            let event_type = parsed
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("output")
                                .to_string();
                            let payload = parsed
                                .get("data")
                                .or_else(|| parsed.get("content"))
                                .map(|v| match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .unwrap_or_default();
                            let is_complete = parsed
                                .get("is_complete")
                                .and_then(Value::as_bool)
                                .unwrap_or(false);
                            let exit_code = parsed
                                .get("exit_code")
                                .and_then(Value::as_i64)
                                .map(|c| c as i32);
                            let metadata =
                                parsed.get("metadata").cloned().unwrap_or(Value::Null);

                            yield Ok(ToolEvent {
                                event_type,
                                data: payload,
                                is_complete,
                                exit_code,
                                metadata,
                            });
                            if is_complete {
                                return;
                            }
                        }
                        Err(_) => {
                            // Non-JSON data line: raw output.
                            yield Ok(ToolEvent {
                                event_type: "output".to_string(),
                                data: data.to_string(),
                                is_complete: false,
                                exit_code: None,
                                metadata: Value::Null,
                            });
                        }
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Some(Err(e)) => {
                        yield Err(SandboxError::run(
                            sandbox_id.clone(),
                            format!("stream error running {tool}: {e}"),
                        ));
                        return;
                    }
                    None => return,
                }
            }
        }))
    }

    async fn claim(&self, config: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/claim", self.base_url))
            .timeout(Duration::from_secs(30))
            .json(&config)
            .send()
            .await
            .map_err(|e| SandboxError::claim(self.id.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::claim(
                self.id.clone(),
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| SandboxError::claim(self.id.clone(), e.to_string()))
    }

    async fn stop(&self) {
        self.set_state(SandboxState::Stopped);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_construction() {
        let sandbox = RemoteSandbox::connect("sb-abc123", "env-1");
        assert_eq!(
            sandbox.base_url(),
            "https://8081-sb-abc123.proxy.daytona.works"
        );
        assert_eq!(sandbox.state(), SandboxState::Running);
    }

    #[test]
    fn test_direct_url() {
        let sandbox = RemoteSandbox::direct("http://localhost:8081");
        assert_eq!(sandbox.base_url(), "http://localhost:8081");
        assert_eq!(sandbox.id(), "local");
    }

    #[test]
    fn test_health_status_parse() {
        let status = HealthStatus::from_value(
            serde_json::json!({"healthy": true, "claimed": false, "uptime": 12}),
        );
        assert!(status.healthy);
        assert!(!status.claimed);
        assert_eq!(status.raw["uptime"], 12);

        let status = HealthStatus::from_value(serde_json::json!({}));
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_run_tool_rejected_when_not_running() {
        let sandbox = RemoteSandbox::starting("sb-1", "env-1");
        let result = sandbox.run_tool("shell", serde_json::json!({})).await;
        match result {
            Err(err) => assert!(matches!(err, SandboxError::Run { .. })),
            Ok(_) => panic!("expected run_tool to be rejected when not running"),
        }
    }
}
