//! MCP client: one connection to one MCP server.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, ServerInfo, ToolInfo,
};
use crate::transport::{HttpTransport, McpTransport, StdioTransport};

/// Configuration for one MCP server.
///
/// A server is reached over stdio when `command` is set, otherwise over HTTP
/// via `url`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Command to spawn for stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the spawned process.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    /// Endpoint URL for HTTP transport.
    #[serde(default)]
    pub url: Option<String>,
}

impl McpServerConfig {
    /// Config for a stdio server.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Config for an HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Add an argument (stdio only).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable (stdio only).
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A client connected to a single MCP server.
pub struct McpClient {
    config: McpServerConfig,
    transport: Mutex<McpTransport>,
    server_info: Option<ServerInfo>,
    request_id: AtomicU64,
    initialized: bool,
}

impl McpClient {
    /// Connect using the transport the config implies.
    ///
    /// Prefers stdio when `command` is set, else streamable HTTP. This does
    /// NOT perform the handshake; call [`initialize`](Self::initialize) next.
    pub fn connect(config: McpServerConfig) -> Result<Self> {
        let transport = if let Some(command) = &config.command {
            let transport = StdioTransport::spawn(command, &config.args, &config.env)?;
            tracing::info!(server = %config.name, command = %command, "connected to MCP server via stdio");
            McpTransport::Stdio(transport)
        } else if let Some(url) = &config.url {
            let transport = HttpTransport::new(url)?;
            tracing::info!(server = %config.name, url = %url, "connected to MCP server via HTTP");
            McpTransport::Http(transport)
        } else {
            return Err(McpError::transport(format!(
                "MCP server {} needs either 'command' or 'url'",
                config.name
            )));
        };

        Ok(Self {
            config,
            transport: Mutex::new(transport),
            server_info: None,
            request_id: AtomicU64::new(1),
            initialized: false,
        })
    }

    /// Server name from the config.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Server identity, available after initialize.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let mut transport = self.transport.lock().await;
        let response = transport.send_request(&request).await?;
        response.into_result().map_err(|e| McpError::Server {
            code: e.code,
            message: e.message,
            data: e.data,
        })
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let mut transport = self.transport.lock().await;
        transport.send_notification(&notification).await
    }

    /// Run the MCP handshake. Must precede every other method.
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.initialized {
            return self.server_info.as_ref().ok_or(McpError::NotInitialized);
        }

        let params = InitializeParams::default();
        let result = self
            .send_request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );

        self.send_notification("notifications/initialized", None)
            .await?;

        self.server_info = Some(init.server_info);
        self.initialized = true;
        Ok(self.server_info.as_ref().unwrap())
    }

    /// List the tools the server advertises.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let result = self.send_request("tools/list", None).await?;
        let list: ListToolsResult = serde_json::from_value(result)?;

        tracing::debug!(
            server = %self.config.name,
            tool_count = list.tools.len(),
            "listed MCP tools"
        );
        Ok(list.tools)
    }

    /// Call a tool and return the raw result.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .send_request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        let call_result: CallToolResult = serde_json::from_value(result)?;

        if call_result.is_error {
            tracing::warn!(server = %self.config.name, tool = %name, "tool call returned error");
        }
        Ok(call_result)
    }

    /// Call a tool and collapse its content list to one text value.
    pub async fn call_tool_text(&self, name: &str, arguments: Option<Value>) -> Result<String> {
        Ok(self.call_tool(name, arguments).await?.text())
    }

    /// Shut the connection down.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(server = %self.config.name, "shutting down MCP client");
        let mut transport = self.transport.lock().await;
        transport.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = McpServerConfig::stdio("fs", "npx")
            .with_arg("-y")
            .with_arg("@modelcontextprotocol/server-filesystem")
            .with_env_var("DEBUG", "1");
        assert_eq!(config.name, "fs");
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.env.get("DEBUG").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_config_parse_from_json() {
        let config: McpServerConfig = serde_json::from_str(
            r#"{"name":"notebook","url":"http://localhost:3001/mcp"}"#,
        )
        .unwrap();
        assert!(config.command.is_none());
        assert_eq!(config.url.as_deref(), Some("http://localhost:3001/mcp"));
    }

    #[test]
    fn test_connect_requires_command_or_url() {
        let config = McpServerConfig {
            name: "broken".to_string(),
            ..Default::default()
        };
        assert!(McpClient::connect(config).is_err());
    }

    #[tokio::test]
    async fn test_connect_nonexistent_command_fails() {
        let config = McpServerConfig::stdio("ghost", "kestrel-no-such-server-cmd");
        assert!(McpClient::connect(config).is_err());
    }

    #[tokio::test]
    async fn test_methods_require_initialize() {
        let config = McpServerConfig::http("remote", "http://localhost:9/mcp");
        let client = McpClient::connect(config).unwrap();
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotInitialized)
        ));
        assert!(matches!(
            client.call_tool("x", None).await,
            Err(McpError::NotInitialized)
        ));
    }
}
