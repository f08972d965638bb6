//! Kestrel - LLM agent runtime server.
//!
//! Wires the model gateway, thread store, sandbox manager, and tool registry
//! into the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use kestrel_llm::{GatewayProvider, SummarizationCompaction};
use kestrel_mcp::McpServerConfig;
use kestrel_sandbox::{
    DaytonaProvider, RemoteSandbox, SandboxManager, SharedHandle, WarmPool,
    manager::DEFAULT_ENV_ID,
};
use kestrel_server::{AppState, Server, ServerConfig};
use kestrel_store::{LocalStore, SharedStore, SupabaseStore};
use kestrel_tools::ToolRegistry;
use kestrel_types::ToolDefinition;

// ─────────────────────────────────────────────────────────────────────────────
// CLI
// ─────────────────────────────────────────────────────────────────────────────

/// Kestrel - LLM agent runtime server
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "KESTREL_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Default model
    #[arg(long, env = "DEFAULT_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Sandbox environment snapshot id
    #[arg(long, env = "SANDBOX_ENV_ID", default_value = DEFAULT_ENV_ID)]
    environment_id: String,

    /// JSON file with MCP server configs
    #[arg(long)]
    mcp_config: Option<PathBuf>,

    /// JSON file with sandbox tool definitions
    #[arg(long)]
    sandbox_tools: Option<PathBuf>,
}

/// One sandbox tool definition as configured on disk.
#[derive(Debug, Deserialize)]
struct SandboxToolSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
    #[serde(default)]
    health_timeout_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let provider = Arc::new(
        GatewayProvider::from_env().context("model gateway configuration")?,
    );

    let store: SharedStore = if std::env::var("SUPABASE_URL").is_ok() {
        tracing::info!("using Supabase thread store");
        Arc::new(SupabaseStore::from_env().context("supabase configuration")?)
    } else {
        tracing::info!("using local SQLite thread store");
        Arc::new(LocalStore::open_from_env().context("local store")?)
    };

    let mut tools = ToolRegistry::new();
    if let Some(path) = &args.mcp_config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let configs: Vec<McpServerConfig> =
            serde_json::from_str(&raw).context("parsing MCP config")?;
        tools.connect_mcp_servers(configs).await;
    }

    let sandbox_tool_defs = match &args.sandbox_tools {
        Some(path) => load_sandbox_tools(path)?,
        None => Vec::new(),
    };

    // Local development: one directly-addressed sandbox serves every thread.
    if let Ok(url) = std::env::var("LOCAL_SANDBOX_URL") {
        let handle: SharedHandle = Arc::new(RemoteSandbox::direct(&url));
        tracing::info!(url = %url, tools = sandbox_tool_defs.len(), "using local sandbox");
        for (definition, health_timeout) in &sandbox_tool_defs {
            if let Err(e) =
                tools.register_sandbox(definition.clone(), handle.clone(), *health_timeout)
            {
                tracing::warn!(tool = %definition.name, error = %e, "failed to register sandbox tool");
            }
        }
    }

    let compaction = Arc::new(SummarizationCompaction::new(provider.clone()));

    let config = ServerConfig::default()
        .with_bind_address(args.bind)
        .with_default_model(&args.model);
    let mut state = AppState::new(
        provider,
        store.clone(),
        tools,
        Some(compaction),
        config,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Per-thread cloud sandboxes need the control-plane key; without it the
    // server runs local, MCP, and directly-addressed sandbox tools only.
    if std::env::var("DAYTONA_API_KEY").is_ok() {
        let sandbox_provider =
            Arc::new(DaytonaProvider::from_env().map_err(|e| anyhow::anyhow!("{e}"))?);
        let warm = WarmPool::from_env();
        let manager = Arc::new(SandboxManager::new(
            store,
            sandbox_provider,
            &args.environment_id,
            Some(warm),
        ));

        tracing::info!(
            environment_id = %args.environment_id,
            sandbox_tools = sandbox_tool_defs.len(),
            "sandbox manager enabled"
        );
        state = state.with_sandbox(manager, sandbox_tool_defs);
    } else {
        tracing::info!("DAYTONA_API_KEY not set, per-thread sandboxes disabled");
    }

    let bind = args.bind;
    Server::new(state)
        .run(bind)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}

fn load_sandbox_tools(path: &PathBuf) -> Result<Vec<(ToolDefinition, Duration)>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let specs: Vec<SandboxToolSpec> =
        serde_json::from_str(&raw).context("parsing sandbox tools")?;

    Ok(specs
        .into_iter()
        .map(|spec| {
            let timeout = Duration::from_secs(spec.health_timeout_secs.unwrap_or(300));
            (
                ToolDefinition::new(spec.name, spec.description, spec.parameters),
                timeout,
            )
        })
        .collect())
}
