//! The Kestrel agent: a streaming state machine that drives a model through
//! a tool-calling loop until it signals completion.
//!
//! [`Agent::run`] yields every observable event (model deltas, tool output,
//! termination) as an [`AgentEvent`](kestrel_types::AgentEvent) stream.
//! [`ThreadSession`] wraps a run with history load, sanitization, and
//! chunk-driven persistence.

pub mod agent;
pub mod error;
pub mod sanitize;
pub mod session;

pub use agent::{Agent, AgentBuilder, AgentConfig, AgentEventStream, IDLE_TOOL_NAME};
pub use error::{AgentError, Result};
pub use sanitize::sanitize_messages;
pub use session::ThreadSession;
