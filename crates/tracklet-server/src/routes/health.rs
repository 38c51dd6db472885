use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}
