//! Warm sandbox pool client.
//!
//! A pool service keeps pre-provisioned sandboxes per environment; claiming
//! one shortens time-to-ready. Every failure mode degrades to `None` so the
//! manager falls back to direct creation.

use std::time::Duration;

use serde_json::Value;

/// Timeout for the pool claim RPC.
const CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the warm-sandbox pool service.
pub struct WarmPool {
    client: reqwest::Client,
    base_url: String,
}

impl WarmPool {
    /// Create a client for the given pool service URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CLAIM_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
        }
    }

    /// Read `WARM_SANDBOX_SERVICE_URL`, defaulting to `http://localhost:8001`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("WARM_SANDBOX_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8001".to_string());
        Self::new(base_url)
    }

    /// Claim a warm sandbox for an environment.
    ///
    /// `200` yields the sandbox id; `404` means the pool is empty; timeouts
    /// and connection errors also yield `None`.
    pub async fn get_warm(&self, environment_id: &str) -> Option<String> {
        let url = format!("{}/claim/{environment_id}", self.base_url);

        let response = match self.client.post(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "warm pool unreachable");
                return None;
            }
        };

        match response.status().as_u16() {
            200 => {
                let body: Value = response.json().await.ok()?;
                let sandbox_id = body.get("sandbox_id")?.as_str()?.to_string();
                tracing::info!(environment_id, sandbox_id = %sandbox_id, "claimed warm sandbox");
                Some(sandbox_id)
            }
            404 => None,
            other => {
                tracing::warn!(environment_id, status = other, "warm pool claim failed");
                None
            }
        }
    }
}
