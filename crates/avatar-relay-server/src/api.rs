//! API error type shared by all handlers.

use avatar_relay_bot::BotError;
use avatar_relay_speech::SpeechError;
use avatar_relay_store::StoreError;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Request and response header carrying the signed avatar session handle.
pub const SESSION_HEADER: &str = "AvatarSessionId";

/// Reads a header as a string, treating absent or non-ASCII values as missing.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// API error type mapping library failures to HTTP responses.
///
/// The body is always `{"error": <code>, "message": <text>}`. Transport and
/// decode details are logged, never returned.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bot(#[from] BotError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Speech(e) => speech_parts(e),
            ApiError::Store(e) => store_parts(e),
            ApiError::Bot(e) => {
                tracing::warn!("bot relay request failed: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "the bot relay service could not start a conversation".to_string(),
                )
            }
        }
    }
}

fn speech_parts(e: &SpeechError) -> (StatusCode, &'static str, String) {
    // Avatar endpoints answer 400 for every failure.
    let status = StatusCode::BAD_REQUEST;
    match e {
        SpeechError::MissingIceToken => (
            status,
            "no_ice_token",
            "no relay token has been fetched; call /api/getIceToken first".to_string(),
        ),
        SpeechError::NotConnected => (
            status,
            "not_connected",
            "no avatar session is connected".to_string(),
        ),
        SpeechError::InvalidSession => (
            status,
            "invalid_session",
            "the avatar session handle is not valid".to_string(),
        ),
        SpeechError::Canceled { reason, details } => (
            status,
            "synthesis_canceled",
            format!("synthesis canceled ({reason}): {details}"),
        ),
        SpeechError::MissingRemoteDescription => (
            status,
            "no_remote_description",
            "the speech service did not return a remote session description".to_string(),
        ),
        SpeechError::Upstream { status: upstream, .. } => {
            tracing::warn!("speech service request failed: {e}");
            (
                status,
                "upstream_error",
                format!("the speech service answered with status {upstream}"),
            )
        }
        SpeechError::Transport(_)
        | SpeechError::Protocol(_)
        | SpeechError::Timeout(_)
        | SpeechError::Config(_)
        | SpeechError::Audio(_) => {
            tracing::warn!("speech service request failed: {e}");
            (
                status,
                "upstream_error",
                "the speech service request failed".to_string(),
            )
        }
    }
}

fn store_parts(e: &StoreError) -> (StatusCode, &'static str, String) {
    match e {
        StoreError::Http { status, message } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            "store_error",
            message.clone(),
        ),
        StoreError::Config(_) => {
            tracing::warn!("document store unavailable: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_error",
                "the message log is not configured".to_string(),
            )
        }
        StoreError::Transport(_) | StoreError::Decode(_) => {
            tracing::warn!("document store request failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                "store_error",
                "the message log could not be read".to_string(),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = Json(serde_json::json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}
