//! Error types for the tools crate.

use thiserror::Error;

/// Result type alias using the tool error type.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type for tool lookup and execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under this name.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    Duplicate(String),

    /// A handler failed.
    #[error("tool '{tool_name}' failed: {message}")]
    Execution {
        /// Name of the failing tool.
        tool_name: String,
        /// Failure detail.
        message: String,
    },

    /// The backing MCP server failed.
    #[error(transparent)]
    Mcp(#[from] kestrel_mcp::McpError),

    /// The backing sandbox failed.
    #[error(transparent)]
    Sandbox(#[from] kestrel_sandbox::SandboxError),
}

impl ToolError {
    /// Create an execution error.
    pub fn execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}
