//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use kestrel_agent::{Agent, ThreadSession};
use kestrel_llm::{CompactionProvider, SharedProvider};
use kestrel_sandbox::{LazySandbox, SandboxManager};
use kestrel_store::SharedStore;
use kestrel_tools::ToolRegistry;
use kestrel_types::ToolDefinition;

use crate::config::ServerConfig;
use crate::error::Result;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Model provider.
    pub provider: SharedProvider,
    /// Thread store.
    pub store: SharedStore,
    /// Base tool registry (local + MCP tools). Cloned when a per-thread
    /// registry with sandbox tools is assembled.
    pub base_tools: Arc<ToolRegistry>,
    /// Sandbox tool definitions with per-tool health budgets, registered
    /// against the thread's lazy sandbox on thread runs.
    pub sandbox_tool_defs: Arc<Vec<(ToolDefinition, Duration)>>,
    /// Sandbox lifecycle manager, when sandboxes are configured.
    pub sandbox_manager: Option<Arc<SandboxManager>>,
    /// Compaction strategy handed to every agent.
    pub compaction: Option<Arc<dyn CompactionProvider>>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prebuilt agent for stateless (threadless) runs.
    pub agent: Arc<Agent>,
}

impl AppState {
    /// Assemble the state, prebuilding the stateless agent.
    pub fn new(
        provider: SharedProvider,
        store: SharedStore,
        base_tools: ToolRegistry,
        compaction: Option<Arc<dyn CompactionProvider>>,
        config: ServerConfig,
    ) -> Result<Self> {
        let agent = Self::build_agent(
            provider.clone(),
            base_tools.clone(),
            compaction.clone(),
            &config,
        )?;

        Ok(Self {
            provider,
            store,
            base_tools: Arc::new(base_tools),
            sandbox_tool_defs: Arc::new(Vec::new()),
            sandbox_manager: None,
            compaction,
            config: Arc::new(config),
            agent: Arc::new(agent),
        })
    }

    /// Attach a sandbox manager and the tool definitions that execute in
    /// per-thread sandboxes.
    pub fn with_sandbox(
        mut self,
        manager: Arc<SandboxManager>,
        tool_defs: Vec<(ToolDefinition, Duration)>,
    ) -> Self {
        self.sandbox_manager = Some(manager);
        self.sandbox_tool_defs = Arc::new(tool_defs);
        self
    }

    fn build_agent(
        provider: SharedProvider,
        tools: ToolRegistry,
        compaction: Option<Arc<dyn CompactionProvider>>,
        config: &ServerConfig,
    ) -> Result<Agent> {
        let mut builder = Agent::builder()
            .with_provider(provider)
            .with_tools(tools)
            .with_model(&config.default_model);
        if let Some(compaction) = compaction {
            builder = builder.with_compaction(compaction);
        }
        builder
            .build()
            .map_err(|e| crate::ServerError::Internal(e.to_string()))
    }

    /// Build a session for a thread.
    ///
    /// When sandboxes are configured this kicks off background provisioning
    /// and registers the sandbox tools against a lazy handle, so the model
    /// can stream while the sandbox comes up.
    pub fn thread_session(&self, thread_id: &str) -> Result<ThreadSession> {
        let agent = match &self.sandbox_manager {
            Some(manager) if !self.sandbox_tool_defs.is_empty() => {
                manager.ensure_background(thread_id);

                let lazy: Arc<LazySandbox> =
                    Arc::new(LazySandbox::new(thread_id, manager.clone()));
                let mut tools = (*self.base_tools).clone();
                for (definition, health_timeout) in self.sandbox_tool_defs.iter() {
                    if let Err(e) = tools.register_sandbox(
                        definition.clone(),
                        lazy.clone(),
                        *health_timeout,
                    ) {
                        tracing::warn!(
                            tool = %definition.name,
                            error = %e,
                            "failed to register sandbox tool"
                        );
                    }
                }
                Arc::new(Self::build_agent(
                    self.provider.clone(),
                    tools,
                    self.compaction.clone(),
                    &self.config,
                )?)
            }
            Some(manager) => {
                manager.ensure_background(thread_id);
                self.agent.clone()
            }
            None => self.agent.clone(),
        };

        Ok(ThreadSession::new(agent, self.store.clone(), thread_id))
    }
}
