use crate::AppState;
use axum::{extract::Extension, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct RecognitionResponse {
    #[serde(rename = "recognizedText")]
    pub recognized_text: String,
}

/// Handler for `POST /start-recognition`.
///
/// Listens on the server's own audio input for one utterance. Failures are
/// reported in the text, never as an error status.
pub async fn start_recognition_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<RecognitionResponse> {
    let outcome = state.recognizer.recognize_once().await;
    tracing::debug!(?outcome, "recognition finished");
    Json(RecognitionResponse {
        recognized_text: outcome.into_text(),
    })
}
