//! Per-thread sandbox lifecycle manager.
//!
//! Three lifecycle cases: a new thread gets a fresh sandbox (warm pool
//! preferred), a thread with a healthy bound sandbox reuses it, and a thread
//! whose sandbox stopped gets it restarted and reclaimed. The thread↔sandbox
//! binding lives in the thread store and survives restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;

use kestrel_store::{SharedStore, ThreadStore};

use crate::error::Result;
use crate::handle::{SandboxHandle, SharedHandle};
use crate::provider::SandboxProvider;
use crate::warm::WarmPool;

/// Default environment snapshot for thread sandboxes.
pub const DEFAULT_ENV_ID: &str = "kafka-lite-vm-0.0.10";

/// Grace period for an unhealthy bound sandbox before restarting it.
const RESTART_GRACE: Duration = Duration::from_secs(60);

/// Default proxy the claimed VM should call back through.
const DEFAULT_PROXY_BASE_URL: &str = "https://kafka-vm-proxy.onrender.com";

struct ReadyEntry {
    handle: SharedHandle,
    verified_at: Instant,
}

#[derive(Default)]
struct ManagerState {
    ready: HashMap<String, ReadyEntry>,
    // A pending slot exists from the moment provisioning is scheduled; the
    // JoinHandle lands in it right after spawn so shutdown can abort.
    pending: HashMap<String, Option<JoinHandle<()>>>,
}

/// Manages the sandbox bound to each thread.
pub struct SandboxManager {
    store: SharedStore,
    provider: Arc<dyn SandboxProvider>,
    warm: Option<WarmPool>,
    environment_id: String,
    state: Mutex<ManagerState>,
}

impl SandboxManager {
    /// Create a manager.
    pub fn new(
        store: SharedStore,
        provider: Arc<dyn SandboxProvider>,
        environment_id: impl Into<String>,
        warm: Option<WarmPool>,
    ) -> Self {
        Self {
            store,
            provider,
            warm,
            environment_id: environment_id.into(),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// The environment snapshot new sandboxes are created from.
    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    /// Whether provisioning is in flight for a thread.
    pub fn is_pending(&self, thread_id: &str) -> bool {
        self.state.lock().unwrap().pending.contains_key(thread_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Claim config
    // ─────────────────────────────────────────────────────────────────────

    /// Build the environment map POSTed to a sandbox's `/claim` endpoint.
    ///
    /// Profile values from the store take precedence; missing fields fall
    /// through to process environment defaults for local development.
    pub async fn build_claim_config(&self, thread_id: &str, sandbox_id: &str) -> Result<Value> {
        let config = self.store.get_thread_config(thread_id).await?;

        let (user_id, kafka_profile_id) = match &config {
            Some(c) => (
                c.user_id.clone().unwrap_or_default(),
                c.kafka_profile_id.clone().unwrap_or_default(),
            ),
            None => {
                let thread = self.store.get_thread(thread_id).await?;
                match thread {
                    Some(t) => (
                        t.user_id.unwrap_or_default(),
                        t.kafka_profile_id.unwrap_or_default(),
                    ),
                    None => (String::new(), String::new()),
                }
            }
        };

        let env_or = |key: &str, fallback: &str| {
            std::env::var(key).unwrap_or_else(|_| fallback.to_string())
        };
        let vm_api_key = config
            .as_ref()
            .and_then(|c| c.vm_api_key.clone())
            .unwrap_or_else(|| env_or("VM_API_KEY", "vm_dev_1234"));
        let openai_virtual_key = config
            .as_ref()
            .and_then(|c| c.virtual_keys.openai.clone())
            .unwrap_or_else(|| env_or("OPENAI_PK_VIRTUAL_KEY", ""));
        let memory_dsn = config
            .as_ref()
            .and_then(|c| c.memory_dsn.clone())
            .unwrap_or_else(|| env_or("MEMORY_DSN", ""));

        Ok(serde_json::json!({
            "config": {
                "PROXY_BASE_URL": env_or("PROXY_BASE_URL", DEFAULT_PROXY_BASE_URL),
                "VM_API_KEY": vm_api_key,
                "OPENAI_PK_VIRTUAL_KEY": openai_virtual_key,
                "USER_ID": user_id,
                "KAFKA_PROFILE_ID": kafka_profile_id,
                "THREAD_ID": thread_id,
                "DEV": env_or("DEV", "false"),
                "DAYTONA_SANDBOX_ID": sandbox_id,
                "MEMORY_DB_DSN": memory_dsn,
            }
        }))
    }

    /// Claim a healthy-but-unclaimed sandbox. Claim failures are logged and
    /// swallowed: the tool path will surface them if they matter.
    async fn claim_if_needed(&self, thread_id: &str, handle: &SharedHandle, claimed: bool) {
        if claimed {
            return;
        }
        tracing::info!(
            thread_id,
            sandbox_id = %handle.id(),
            "sandbox not claimed, claiming now"
        );
        match self.build_claim_config(thread_id, &handle.id()).await {
            Ok(config) => {
                if let Err(e) = handle.claim(config).await {
                    tracing::warn!(
                        thread_id,
                        sandbox_id = %handle.id(),
                        error = %e,
                        "failed to claim sandbox"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "failed to build claim config");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Non-blocking path
    // ─────────────────────────────────────────────────────────────────────

    /// Get the thread's sandbox immediately if it is healthy, else `None`.
    ///
    /// Re-verifies cached handles via `/health` on every call, claims
    /// unclaimed sandboxes, and evicts stale cache entries.
    pub async fn get_if_ready(&self, thread_id: &str) -> Option<SharedHandle> {
        let cached = {
            let state = self.state.lock().unwrap();
            state.ready.get(thread_id).map(|entry| entry.handle.clone())
        };

        if let Some(handle) = cached {
            match handle.health_status().await {
                Some(status) if status.healthy => {
                    self.claim_if_needed(thread_id, &handle, status.claimed).await;
                    let mut state = self.state.lock().unwrap();
                    if let Some(entry) = state.ready.get_mut(thread_id) {
                        entry.verified_at = Instant::now();
                    }
                    return Some(handle);
                }
                _ => {
                    tracing::debug!(
                        thread_id,
                        sandbox_id = %handle.id(),
                        "evicting stale ready-cache entry"
                    );
                    self.state.lock().unwrap().ready.remove(thread_id);
                }
            }
        }

        let sandbox_id = self.store.get_thread_sandbox_id(thread_id).await.ok()??;

        let handle = self
            .provider
            .connect(&sandbox_id, &self.environment_id)
            .await
            .ok()?;
        let status = handle.health_status().await?;
        if !status.healthy {
            return None;
        }

        self.claim_if_needed(thread_id, &handle, status.claimed).await;
        self.state.lock().unwrap().ready.insert(
            thread_id.to_string(),
            ReadyEntry {
                handle: handle.clone(),
                verified_at: Instant::now(),
            },
        );
        Some(handle)
    }

    /// Start provisioning in the background if not already pending.
    ///
    /// Returns immediately; poll [`get_if_ready`](Self::get_if_ready) (or use
    /// a [`LazySandbox`](crate::LazySandbox)) to pick up the result.
    pub fn ensure_background(self: &Arc<Self>, thread_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.pending.contains_key(thread_id) {
                tracing::debug!(thread_id, "sandbox already being prepared");
                return;
            }
            state.pending.insert(thread_id.to_string(), None);
        }

        tracing::info!(thread_id, "starting background sandbox setup");

        let manager = Arc::clone(self);
        let tid = thread_id.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = manager.provision(&tid).await {
                tracing::error!(thread_id = %tid, error = %e, "background sandbox setup failed");
            }
            manager.state.lock().unwrap().pending.remove(&tid);
        });

        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.pending.get_mut(thread_id) {
            *slot = Some(task);
        }
    }

    /// The full provisioning sequence: id, health, claim, cache.
    async fn provision(&self, thread_id: &str) -> Result<()> {
        let handle = match self.store.get_thread_sandbox_id(thread_id).await? {
            Some(sandbox_id) => {
                self.provider
                    .connect(&sandbox_id, &self.environment_id)
                    .await?
            }
            None => {
                let handle = self.create_sandbox(thread_id).await?;
                self.store
                    .update_thread_sandbox_id(thread_id, &handle.id())
                    .await?;
                handle
            }
        };

        handle.health_wait(None).await?;

        let config = self.build_claim_config(thread_id, &handle.id()).await?;
        handle
            .claim(config)
            .await
            .map(|result| tracing::debug!(thread_id, ?result, "claim result"))?;

        self.state.lock().unwrap().ready.insert(
            thread_id.to_string(),
            ReadyEntry {
                handle,
                verified_at: Instant::now(),
            },
        );
        tracing::info!(thread_id, "sandbox ready");
        Ok(())
    }

    /// Create a sandbox, preferring the warm pool.
    async fn create_sandbox(&self, thread_id: &str) -> Result<SharedHandle> {
        if let Some(warm) = &self.warm {
            if let Some(warm_id) = warm.get_warm(&self.environment_id).await {
                tracing::info!(thread_id, sandbox_id = %warm_id, "using warm sandbox");
                return self.provider.connect(&warm_id, &self.environment_id).await;
            }
            tracing::debug!(thread_id, "no warm sandbox available, creating new");
        }

        let handle = self.provider.create(&self.environment_id).await?;
        tracing::info!(thread_id, sandbox_id = %handle.id(), "created sandbox");
        Ok(handle)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Blocking path
    // ─────────────────────────────────────────────────────────────────────

    /// Ensure a ready sandbox for the thread, blocking through creation,
    /// health wait, restart, and claim as needed.
    pub async fn ensure_blocking(&self, thread_id: &str) -> Result<SharedHandle> {
        let cached = {
            let state = self.state.lock().unwrap();
            state.ready.get(thread_id).map(|entry| entry.handle.clone())
        };
        if let Some(handle) = cached {
            if handle.check_health().await {
                return Ok(handle);
            }
            self.state.lock().unwrap().ready.remove(thread_id);
        }

        let sandbox_id = self.store.get_thread_sandbox_id(thread_id).await?;
        tracing::debug!(thread_id, ?sandbox_id, "ensure_blocking");

        let handle = match sandbox_id {
            None => {
                // New thread: create, bind, wait, claim.
                let handle = self.create_sandbox(thread_id).await?;
                self.store
                    .update_thread_sandbox_id(thread_id, &handle.id())
                    .await?;
                handle.health_wait(None).await?;
                let config = self.build_claim_config(thread_id, &handle.id()).await?;
                handle.claim(config).await?;
                handle
            }
            Some(sandbox_id) => {
                let handle = self
                    .provider
                    .connect(&sandbox_id, &self.environment_id)
                    .await?;

                if handle.check_health().await {
                    handle
                } else if handle.health_wait(Some(RESTART_GRACE)).await.is_ok() {
                    // Was still starting up.
                    handle
                } else {
                    // Stopped or expired: restart, rebind on id change, reclaim.
                    tracing::info!(thread_id, sandbox_id = %sandbox_id, "restarting sandbox");
                    let handle = self
                        .provider
                        .restart(&sandbox_id, &self.environment_id)
                        .await?;
                    if handle.id() != sandbox_id {
                        self.store
                            .update_thread_sandbox_id(thread_id, &handle.id())
                            .await?;
                    }
                    handle.health_wait(None).await?;
                    let config = self.build_claim_config(thread_id, &handle.id()).await?;
                    handle.claim(config).await?;
                    handle
                }
            }
        };

        self.state.lock().unwrap().ready.insert(
            thread_id.to_string(),
            ReadyEntry {
                handle: handle.clone(),
                verified_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────

    /// Stop the thread's handle if present. The DB binding is kept.
    pub async fn release(&self, thread_id: &str) {
        let entry = self.state.lock().unwrap().ready.remove(thread_id);
        if let Some(entry) = entry {
            entry.handle.stop().await;
            tracing::info!(thread_id, sandbox_id = %entry.handle.id(), "released sandbox");
        }
    }

    /// Abort all in-flight provisioning tasks.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        for (thread_id, task) in state.pending.drain() {
            if let Some(task) = task {
                tracing::debug!(thread_id = %thread_id, "aborting sandbox provisioning");
                task.abort();
            }
        }
    }
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
