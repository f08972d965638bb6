//! Error types for the LLM crate.

use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Any failure surfaced by the model gateway.
    #[error("LLM provider error ({provider}): {message}")]
    Provider {
        /// Gateway or provider name.
        provider: String,
        /// HTTP status, when the failure came with one.
        status_code: Option<u16>,
        /// The provider's error message.
        message: String,
        /// Structured error body, when the provider returned one.
        body: Option<String>,
    },

    /// Network/connectivity failure before a response was obtained.
    #[error("network error: {0}")]
    Network(String),

    /// Configuration error (missing API key, bad base URL).
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed input messages.
    #[error(transparent)]
    Validation(#[from] kestrel_types::ValidationError),
}

impl LlmError {
    /// Wrap a downstream failure as a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            status_code: None,
            message: message.into(),
            body: None,
        }
    }

    /// Wrap an HTTP error response as a provider error.
    pub fn provider_status(
        provider: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            status_code: Some(status_code),
            message: message.into(),
            body,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            LlmError::Network(format!("connection failed: {err}"))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = LlmError::provider("gateway", "bad things");
        assert!(err.to_string().contains("gateway"));
        assert!(err.to_string().contains("bad things"));
    }

    #[test]
    fn test_provider_status_keeps_body() {
        let err = LlmError::provider_status("gateway", 400, "rejected", Some("{}".to_string()));
        match err {
            LlmError::Provider {
                status_code, body, ..
            } => {
                assert_eq!(status_code, Some(400));
                assert_eq!(body.as_deref(), Some("{}"));
            }
            _ => panic!("expected provider error"),
        }
    }
}
