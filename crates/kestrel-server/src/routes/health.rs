//! Health endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

/// Health report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    /// Whether the agent session wiring initialized.
    pub kafka_initialized: bool,
}

/// GET /health: liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server health", body = HealthResponse)),
    tag = "health"
)]
pub async fn health_handler(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        kafka_initialized: true,
    })
}
