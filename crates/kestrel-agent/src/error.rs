//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model provider failed.
    #[error(transparent)]
    Llm(#[from] kestrel_llm::LlmError),

    /// Tool lookup or execution failed.
    #[error(transparent)]
    Tool(#[from] kestrel_tools::ToolError),

    /// The thread store failed.
    #[error(transparent)]
    Store(#[from] kestrel_store::StoreError),

    /// The input messages were malformed.
    #[error(transparent)]
    Validation(#[from] kestrel_types::ValidationError),

    /// Misconfigured agent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// The error-category name surfaced on `error` events.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Llm(_) => "LLMProviderError",
            Self::Tool(_) => "ToolProviderError",
            Self::Store(_) => "StoreError",
            Self::Validation(_) => "ValidationError",
            Self::Config(_) => "ConfigError",
        }
    }
}
