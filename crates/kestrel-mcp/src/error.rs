//! Error types for the MCP crate.

use thiserror::Error;

/// Result type alias using the MCP error type.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level failure (spawn, pipe, HTTP).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server returned a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional error data.
        data: Option<serde_json::Value>,
    },

    /// A method was called before `initialize()`.
    #[error("client not initialized")]
    NotInitialized,

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure on the stdio transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
