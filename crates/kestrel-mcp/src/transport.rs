//! MCP transports: stdio child process and HTTP POST.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Default timeout for a single HTTP request.
const HTTP_TIMEOUT_SECS: u64 = 60;

/// How long to wait for a stdio response line.
const STDIO_RESPONSE_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Stdio
// ─────────────────────────────────────────────────────────────────────────────

/// Line-delimited JSON-RPC over a spawned child process.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioTransport {
    /// Spawn the server process and wire up its pipes.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::transport(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport("child stdout unavailable"))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn write_line(&mut self, value: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response with the matching id.
    ///
    /// Server-initiated notifications arriving in between are skipped.
    pub async fn send_request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.write_line(&serde_json::to_value(request)?).await?;

        let deadline = Duration::from_secs(STDIO_RESPONSE_TIMEOUT_SECS);
        tokio::time::timeout(deadline, async {
            let mut line = String::new();
            loop {
                line.clear();
                let read = self.stdout.read_line(&mut line).await?;
                if read == 0 {
                    return Err(McpError::transport("server closed stdout"));
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                    Ok(response) if response.id == Some(request.id) => return Ok(response),
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping non-response line from MCP server");
                    }
                }
            }
        })
        .await
        .map_err(|_| McpError::transport("timed out waiting for MCP response"))?
    }

    /// Send a notification (no response expected).
    pub async fn send_notification(&mut self, notification: &JsonRpcNotification) -> Result<()> {
        self.write_line(&serde_json::to_value(notification)?).await
    }

    /// Kill the child process.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.child.kill().await;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC over streamable HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// POST a request and parse the JSON-RPC response.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self
            .client
            .post(&self.url)
            .header("accept", "application/json, text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| McpError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::transport(format!(
                "HTTP {status} from MCP server"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| McpError::transport(e.to_string()))?;

        // Streamable HTTP may frame the response as a single SSE event.
        let payload = body
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap_or(body.as_str());

        Ok(serde_json::from_str(payload)?)
    }

    /// POST a notification, ignoring the response body.
    pub async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| McpError::transport(e.to_string()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unified transport
// ─────────────────────────────────────────────────────────────────────────────

/// Either transport behind one interface.
pub enum McpTransport {
    /// Spawned child process.
    Stdio(StdioTransport),
    /// Remote HTTP endpoint.
    Http(HttpTransport),
}

impl McpTransport {
    /// Send a request over whichever transport is active.
    pub async fn send_request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        match self {
            Self::Stdio(t) => t.send_request(request).await,
            Self::Http(t) => t.send_request(request).await,
        }
    }

    /// Send a notification over whichever transport is active.
    pub async fn send_notification(&mut self, notification: &JsonRpcNotification) -> Result<()> {
        match self {
            Self::Stdio(t) => t.send_notification(notification).await,
            Self::Http(t) => t.send_notification(notification).await,
        }
    }

    /// Tear the transport down.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Stdio(t) => t.shutdown().await,
            Self::Http(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_nonexistent_command_fails() {
        let env = std::collections::HashMap::new();
        let result = StdioTransport::spawn("kestrel-no-such-mcp-server-xyz", &[], &env);
        assert!(result.is_err());
    }

    #[test]
    fn test_http_transport_construction() {
        assert!(HttpTransport::new("http://localhost:9999/mcp").is_ok());
    }
}
