//! Server configuration.

use std::net::SocketAddr;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: SocketAddr,
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Models advertised on `/v1/models`.
    pub models: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".parse().expect("valid address"),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            models: vec![
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
                "gpt-5".to_string(),
                "claude-sonnet-4-5".to_string(),
                "gemini-2.5-pro".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// Override the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Override the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}
