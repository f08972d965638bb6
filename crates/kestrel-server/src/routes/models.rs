//! Model listing endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

/// One advertised model.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Always `"model"`.
    pub object: String,
    /// Owner label.
    pub owned_by: String,
}

/// OpenAI-shape model listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelsResponse {
    /// Always `"list"`.
    pub object: String,
    /// Advertised models.
    pub data: Vec<ModelInfo>,
}

/// GET /v1/models: the models this gateway routes to.
#[utoipa::path(
    get,
    path = "/v1/models",
    responses((status = 200, description = "Model listing", body = ModelsResponse)),
    tag = "models"
)]
pub async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    let data = state
        .config
        .models
        .iter()
        .map(|id| ModelInfo {
            id: id.clone(),
            object: "model".to_string(),
            owned_by: "kestrel".to_string(),
        })
        .collect();

    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}
