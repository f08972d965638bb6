//! The tool registry.
//!
//! One namespace over three tool kinds. Registration order is preserved so
//! the definitions advertised to the model are stable; name collisions are
//! rejected (first registration wins).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kestrel_mcp::{McpClient, McpServerConfig};
use kestrel_sandbox::SharedHandle;
use kestrel_types::ToolDefinition;

use crate::error::{Result, ToolError};
use crate::handler::LocalHandler;

/// Default health-wait budget for sandbox tools.
pub const DEFAULT_SANDBOX_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Which backend executes a tool.
#[derive(Clone)]
pub enum ToolKind {
    /// In-process handler.
    Local(LocalHandler),
    /// Runs inside the thread's remote sandbox.
    Sandbox {
        /// The sandbox to execute in.
        handle: SharedHandle,
        /// How long to wait for sandbox health before the call.
        health_timeout: Duration,
    },
    /// Provided by an MCP server.
    Mcp {
        /// Connection the tool was discovered from.
        client: Arc<McpClient>,
    },
}

impl ToolKind {
    /// Kind name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Sandbox { .. } => "sandbox",
            Self::Mcp { .. } => "mcp",
        }
    }
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolEntry {
    /// The definition advertised to the model.
    pub definition: ToolDefinition,
    /// Executing backend.
    pub kind: ToolKind,
}

/// Registry of all tools available to a session.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
    order: Vec<String>,
    broadcast_pipe: Option<PathBuf>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broadcaster FIFO path used to stream MCP tool output.
    pub fn with_broadcast_pipe(mut self, path: impl Into<PathBuf>) -> Self {
        self.broadcast_pipe = Some(path.into());
        self
    }

    /// The configured broadcaster FIFO path, if any.
    pub fn broadcast_pipe(&self) -> Option<&PathBuf> {
        self.broadcast_pipe.as_ref()
    }

    fn insert(&mut self, entry: ToolEntry) -> Result<()> {
        let name = entry.definition.name.clone();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        tracing::debug!(tool = %name, kind = entry.kind.kind_name(), "registered tool");
        self.order.push(name.clone());
        self.tools.insert(name, entry);
        Ok(())
    }

    /// Register an in-process tool.
    pub fn register_local(
        &mut self,
        definition: ToolDefinition,
        handler: LocalHandler,
    ) -> Result<()> {
        self.insert(ToolEntry {
            definition,
            kind: ToolKind::Local(handler),
        })
    }

    /// Register a sandbox-executed tool.
    pub fn register_sandbox(
        &mut self,
        definition: ToolDefinition,
        handle: SharedHandle,
        health_timeout: Duration,
    ) -> Result<()> {
        self.insert(ToolEntry {
            definition,
            kind: ToolKind::Sandbox {
                handle,
                health_timeout,
            },
        })
    }

    /// Register one discovered MCP tool.
    pub fn register_mcp(
        &mut self,
        definition: ToolDefinition,
        client: Arc<McpClient>,
    ) -> Result<()> {
        self.insert(ToolEntry {
            definition,
            kind: ToolKind::Mcp { client },
        })
    }

    /// Connect the configured MCP servers and register their tools.
    ///
    /// A server that fails to connect or initialize is logged and skipped;
    /// the rest of the session is unaffected. Within a server, a tool whose
    /// name is already taken is skipped with a warning.
    pub async fn connect_mcp_servers(&mut self, configs: Vec<McpServerConfig>) {
        for config in configs {
            let name = config.name.clone();
            let mut client = match McpClient::connect(config) {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to connect MCP server, skipping");
                    continue;
                }
            };
            if let Err(e) = client.initialize().await {
                tracing::warn!(server = %name, error = %e, "failed to initialize MCP server, skipping");
                continue;
            }

            let client = Arc::new(client);
            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list MCP tools, skipping");
                    continue;
                }
            };

            let mut registered = 0usize;
            for tool in tools {
                let definition =
                    ToolDefinition::new(&tool.name, &tool.description, tool.input_schema.clone());
                match self.register_mcp(definition, client.clone()) {
                    Ok(()) => registered += 1,
                    Err(ToolError::Duplicate(tool_name)) => {
                        tracing::warn!(
                            server = %name,
                            tool = %tool_name,
                            "MCP tool name already taken, skipping"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "failed to register MCP tool");
                    }
                }
            }
            tracing::info!(server = %name, tools = registered, "MCP server connected");
        }
    }

    /// Look a tool up by name.
    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    /// Whether a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| entry.definition.clone())
            .collect()
    }

    /// All definitions in OpenAI function shape, for the model request.
    pub fn get_tools(&self) -> Vec<serde_json::Value> {
        self.definitions()
            .iter()
            .map(ToolDefinition::to_openai)
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "a test tool", json!({"type": "object", "properties": {}}))
    }

    fn echo_handler() -> LocalHandler {
        LocalHandler::sync(|args| Ok(args))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(definition("get_weather"), echo_handler())
            .unwrap();

        assert!(registry.contains("get_weather"));
        assert!(!registry.contains("other"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("get_weather").unwrap().kind.kind_name(),
            "local"
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(definition("shell"), echo_handler())
            .unwrap();

        let err = registry
            .register_local(definition("shell"), echo_handler())
            .unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "shell"));
        // First registration wins.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(definition("beta"), echo_handler())
            .unwrap();
        registry
            .register_local(definition("alpha"), echo_handler())
            .unwrap();

        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[test]
    fn test_get_tools_openai_shape() {
        let mut registry = ToolRegistry::new();
        registry
            .register_local(definition("count"), echo_handler())
            .unwrap();

        let tools = registry.get_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "count");
    }

    #[tokio::test]
    async fn test_failed_mcp_server_skipped() {
        let mut registry = ToolRegistry::new();
        registry
            .connect_mcp_servers(vec![McpServerConfig::stdio(
                "ghost",
                "kestrel-no-such-server-cmd",
            )])
            .await;
        assert!(registry.is_empty());
    }
}
