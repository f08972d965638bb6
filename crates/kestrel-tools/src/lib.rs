//! Tool registry and executor for Kestrel.
//!
//! Three kinds of tools share one namespace: in-process functions, tools
//! executed inside a thread's remote sandbox, and tools discovered from MCP
//! servers. The executor adapts all three to the same streaming contract: a
//! lazy sequence of [`ToolResultChunk`](kestrel_types::ToolResultChunk)s
//! terminated by an `is_complete` sentinel.

pub mod error;
pub mod executor;
pub mod handler;
pub mod registry;

pub use error::{Result, ToolError};
pub use executor::{parse_arguments, ToolChunkStream};
pub use handler::LocalHandler;
pub use registry::{ToolEntry, ToolKind, ToolRegistry};
