//! Lazy sandbox handle.
//!
//! Wraps `(thread_id, manager)` and defers resolution until an operation
//! actually needs the real sandbox, so the model can start streaming while
//! provisioning runs in the background.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SandboxError};
use crate::handle::{HealthStatus, SandboxHandle, SandboxState, SharedHandle, ToolEventStream};
use crate::manager::SandboxManager;

/// Default time a lazy handle waits for the real sandbox.
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between readiness polls.
const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A sandbox facade that resolves on first real use.
pub struct LazySandbox {
    thread_id: String,
    manager: Arc<SandboxManager>,
    timeout: Duration,
    resolved: RwLock<Option<SharedHandle>>,
    resolve_lock: tokio::sync::Mutex<()>,
}

impl LazySandbox {
    /// Create a lazy handle for a thread.
    pub fn new(thread_id: impl Into<String>, manager: Arc<SandboxManager>) -> Self {
        Self {
            thread_id: thread_id.into(),
            manager,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
            resolved: RwLock::new(None),
            resolve_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the resolve timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn current(&self) -> Option<SharedHandle> {
        self.resolved.read().unwrap().clone()
    }

    /// Block until the manager has a ready handle, with a poll-loop that is
    /// cancellable on each interval boundary.
    async fn ensure_resolved(&self) -> Result<SharedHandle> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.resolve_lock.lock().await;
        // Another caller may have resolved while we waited on the lock.
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        tracing::debug!(thread_id = %self.thread_id, "lazy sandbox resolving");

        let start = tokio::time::Instant::now();
        loop {
            if let Some(handle) = self.manager.get_if_ready(&self.thread_id).await {
                tracing::info!(
                    thread_id = %self.thread_id,
                    sandbox_id = %handle.id(),
                    "lazy sandbox resolved"
                );
                *self.resolved.write().unwrap() = Some(handle.clone());
                return Ok(handle);
            }

            if start.elapsed() >= self.timeout {
                return Err(SandboxError::ResolveTimeout {
                    thread_id: self.thread_id.clone(),
                });
            }

            tokio::time::sleep(RESOLVE_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl SandboxHandle for LazySandbox {
    fn id(&self) -> String {
        match self.current() {
            Some(handle) => handle.id(),
            None => {
                let prefix: String = self.thread_id.chars().take(8).collect();
                format!("pending-{prefix}")
            }
        }
    }

    fn environment_id(&self) -> String {
        match self.current() {
            Some(handle) => handle.environment_id(),
            None => self.manager.environment_id().to_string(),
        }
    }

    fn state(&self) -> SandboxState {
        match self.current() {
            Some(handle) => handle.state(),
            None => SandboxState::Creating,
        }
    }

    async fn health_status(&self) -> Option<HealthStatus> {
        let handle = self.ensure_resolved().await.ok()?;
        handle.health_status().await
    }

    async fn health_wait(&self, timeout: Option<Duration>) -> Result<()> {
        let handle = self.ensure_resolved().await?;
        handle.health_wait(timeout).await
    }

    async fn run_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolEventStream> {
        let handle = self.ensure_resolved().await?;
        handle.run_tool(tool_name, arguments).await
    }

    async fn claim(&self, config: Value) -> Result<Value> {
        let handle = self.ensure_resolved().await?;
        handle.claim(config).await
    }

    async fn stop(&self) {
        // Only a resolved sandbox can be stopped; an unresolved one has
        // nothing to release.
        if let Some(handle) = self.current() {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{manager_with, MockProvider};
    use kestrel_store::{LocalStore, ThreadStore};

    #[tokio::test]
    async fn test_placeholder_identity_before_resolve() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let manager = Arc::new(manager_with(store, MockProvider::default()));

        let lazy = LazySandbox::new("thread-12345678-rest", manager);
        assert_eq!(lazy.id(), "pending-thread-1");
        assert_eq!(lazy.state(), SandboxState::Creating);
    }

    #[tokio::test]
    async fn test_resolve_times_out_without_sandbox() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        store.create_thread(Some("t1"), None, None, None).await.unwrap();
        let manager = Arc::new(manager_with(store, MockProvider::default()));

        let lazy =
            LazySandbox::new("t1", manager).with_timeout(Duration::from_millis(250));
        let err = lazy.health_wait(None).await.unwrap_err();
        assert!(matches!(err, SandboxError::ResolveTimeout { .. }));
    }
}
