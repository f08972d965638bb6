//! LLM provider layer for Kestrel.
//!
//! Defines the [`LlmProvider`] trait the agent loop drives, the
//! [`GatewayProvider`] implementation that talks to an OpenAI-compatible
//! model gateway with per-family virtual keys, and the context-compaction
//! machinery used when a conversation outgrows the model's window.

pub mod compaction;
pub mod error;
pub mod family;
pub mod gateway;
pub mod normalize;
pub mod overflow;
pub mod provider;

pub use compaction::{
    CompactionProvider, SummarizationCompaction, TruncationCompaction, find_safe_split_point,
    validate_message_structure,
};
pub use error::{LlmError, Result};
pub use family::ModelFamily;
pub use gateway::{GatewayConfig, GatewayProvider};
pub use normalize::{normalize_for_family, prune_images};
pub use overflow::is_context_overflow;
pub use provider::{
    ChunkStream, CompletionParams, CompletionResponse, LlmProvider, MockProvider, MockScript,
    SharedProvider, Usage,
};
