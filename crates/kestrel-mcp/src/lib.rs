//! MCP (Model Context Protocol) client.
//!
//! External processes expose tools over JSON-RPC; Kestrel consumes them
//! through [`McpClient`], preferring stdio when the server config names a
//! command and HTTP otherwise. A server that fails to connect is skipped;
//! its tools simply do not appear in the session.

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{McpClient, McpServerConfig};
pub use error::{McpError, Result};
pub use protocol::{CallToolResult, ServerInfo, ToolInfo};
