use crate::api::ApiError;
use crate::AppState;
use axum::{extract::Extension, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct LatestMessageResponse {
    pub message: String,
}

/// Handler for `GET /api/get-latest-message`.
pub async fn get_latest_message_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<LatestMessageResponse>, ApiError> {
    let message = state.messages.latest_message_text().await?;
    Ok(Json(LatestMessageResponse { message }))
}
