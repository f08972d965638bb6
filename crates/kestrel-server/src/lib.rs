//! HTTP API server for Kestrel.
//!
//! OpenAI-compatible chat completions plus agent-run endpoints, stateless or
//! thread-bound, all streaming over SSE with `data: <json>` framing and a
//! terminal `data: [DONE]`.

pub mod config;
pub mod error;
pub mod routes;
pub mod sse;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The Kestrel HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::{get, post};

        Router::new()
            .route("/health", get(routes::health_handler))
            .route("/v1/models", get(routes::models_handler))
            .route("/v1/chat/completions", post(routes::chat_handler))
            .route(
                "/v1/threads/{thread_id}/chat/completions",
                post(routes::thread_chat_handler),
            )
            .route("/v1/agent/run", post(routes::agent_run_handler))
            .route(
                "/v1/threads/{thread_id}/agent/run",
                post(routes::thread_agent_run_handler),
            )
            .route("/v1/threads", post(routes::create_thread_handler))
            .route(
                "/v1/threads/{thread_id}/messages",
                get(routes::get_messages_handler)
                    .post(routes::add_message_handler)
                    .delete(routes::delete_messages_handler),
            )
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();

        tracing::info!(%addr, "starting server");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to bind: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::Internal(format!("server error: {e}")))?;
        Ok(())
    }
}
