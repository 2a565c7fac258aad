use crate::api::ApiError;
use crate::AppState;
use avatar_relay_bot::ConversationSession;
use axum::{extract::Extension, Json};
use std::sync::Arc;

/// Handler for `GET /convid`. Starts a bot relay conversation per call.
pub async fn convid_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ConversationSession>, ApiError> {
    let session = state.bot.start_conversation().await?;
    Ok(Json(session))
}
