//! Sandbox provisioning.
//!
//! The [`SandboxProvider`] trait is the seam to the cloud-sandbox control
//! plane: create from a snapshot, connect by id, restart, stop. The
//! [`DaytonaProvider`] implementation drives the Daytona REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SandboxError};
use crate::handle::{RemoteSandbox, SharedHandle};

/// Default control-plane API base.
const DEFAULT_API_BASE: &str = "https://app.daytona.io/api";

/// Control-plane operations the manager needs.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new sandbox from an environment snapshot. The returned
    /// handle is still starting; callers follow with `health_wait`.
    async fn create(&self, environment_id: &str) -> Result<SharedHandle>;

    /// Handle to an existing sandbox by id.
    async fn connect(&self, sandbox_id: &str, environment_id: &str) -> Result<SharedHandle>;

    /// Restart a stopped sandbox. May return a handle with a different id.
    async fn restart(&self, sandbox_id: &str, environment_id: &str) -> Result<SharedHandle>;

    /// Stop a sandbox on the control plane.
    async fn stop(&self, sandbox_id: &str) -> Result<bool>;
}

/// Daytona control-plane client.
pub struct DaytonaProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl DaytonaProvider {
    /// Create a provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Read `DAYTONA_API_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DAYTONA_API_KEY")
            .map_err(|_| SandboxError::provision("DAYTONA_API_KEY not set"))?;
        Ok(Self::new(api_key))
    }

    /// Override the API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.api_base))
            .header("authorization", format!("Bearer {}", self.api_key));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SandboxError::provision(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SandboxError::provision(format!("HTTP {status}: {body}")));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| SandboxError::provision(e.to_string()))
    }
}

#[async_trait]
impl SandboxProvider for DaytonaProvider {
    async fn create(&self, environment_id: &str) -> Result<SharedHandle> {
        let created = self
            .post(
                "/sandbox",
                Some(serde_json::json!({
                    "snapshot": environment_id,
                    "public": true,
                    "autoStopInterval": 0,
                })),
            )
            .await?;

        let sandbox_id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::provision("create response without id"))?
            .to_string();

        tracing::info!(sandbox_id = %sandbox_id, environment_id, "created sandbox");
        Ok(Arc::new(RemoteSandbox::starting(sandbox_id, environment_id)))
    }

    async fn connect(&self, sandbox_id: &str, environment_id: &str) -> Result<SharedHandle> {
        Ok(Arc::new(RemoteSandbox::connect(sandbox_id, environment_id)))
    }

    async fn restart(&self, sandbox_id: &str, environment_id: &str) -> Result<SharedHandle> {
        self.post(&format!("/sandbox/{sandbox_id}/start"), None)
            .await?;
        tracing::info!(sandbox_id, "restarted sandbox");
        Ok(Arc::new(RemoteSandbox::starting(sandbox_id, environment_id)))
    }

    async fn stop(&self, sandbox_id: &str) -> Result<bool> {
        match self.post(&format!("/sandbox/{sandbox_id}/stop"), None).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(sandbox_id, error = %e, "failed to stop sandbox");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_key() {
        let provider = DaytonaProvider::new("dtn-key").with_api_base("http://localhost:9000");
        assert_eq!(provider.api_base, "http://localhost:9000");
    }
}
