//! Avatar relay token and session handlers.

use crate::api::{header_str, ApiError, SESSION_HEADER};
use crate::AppState;
use avatar_relay_speech::{ConnectRequest, IceToken, SpeechError};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Largest SSML document accepted by `/api/speak` (64 KiB).
pub const MAX_SSML_BYTES: usize = 64 * 1024;

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for `GET /api/getIceToken`.
///
/// Relays the speech service's token body verbatim. A well-formed token is
/// also kept for the next avatar connect.
pub async fn get_ice_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let private_endpoint = header_str(&headers, "PrivateEndpoint");
    let relayed = state.relay_tokens.fetch(private_endpoint).await?;

    if !relayed.is_success() {
        return Err(SpeechError::Upstream {
            status: relayed.status,
            body: relayed.body,
        }
        .into());
    }

    match IceToken::parse(&relayed.body) {
        Ok(token) => state.avatars.store_ice_token(token),
        Err(e) => tracing::warn!("relay token body is not a usable ICE token: {e}"),
    }

    Ok(plain_text(StatusCode::OK, relayed.body))
}

/// Handler for `POST /api/connectAvatar`.
///
/// Returns the remote session description as the body and the session
/// handle in the `AvatarSessionId` header.
pub async fn connect_avatar_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let local_sdp = header_str(&headers, "LocalSdp")
        .ok_or_else(|| ApiError::BadRequest("missing LocalSdp header".to_string()))?;
    // Absent avatar fields stay unset so the service falls back to its defaults.
    let field = |name: &str| header_str(&headers, name).map(str::to_string);

    let request = ConnectRequest {
        local_sdp: local_sdp.to_string(),
        character: field("AvatarCharacter"),
        style: field("AvatarStyle"),
        background_color: field("BackgroundColor"),
    };

    let connected = state.avatars.connect(request).await?;
    tracing::info!(
        result_id = %connected.result_id,
        sessions = state.avatars.session_count(),
        "avatar connected"
    );

    let mut response = plain_text(StatusCode::OK, connected.remote_sdp);
    let handle = HeaderValue::from_str(&connected.session_id)
        .map_err(|e| SpeechError::Protocol(format!("unencodable session handle: {e}")))?;
    response
        .headers_mut()
        .insert(HeaderName::from_static("avatarsessionid"), handle);
    Ok(response)
}

/// Handler for `POST /api/speak`. The body is literal SSML.
pub async fn speak_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.len() > MAX_SSML_BYTES {
        return Err(ApiError::BadRequest(format!(
            "SSML body exceeds {MAX_SSML_BYTES} bytes"
        )));
    }
    let ssml = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("SSML body is not valid UTF-8".to_string()))?;

    let result_id = state
        .avatars
        .speak(header_str(&headers, SESSION_HEADER), ssml)
        .await?;
    Ok(plain_text(StatusCode::OK, result_id))
}

/// Handler for `POST /api/disconnectAvatar`.
pub async fn disconnect_avatar_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state
        .avatars
        .disconnect(header_str(&headers, SESSION_HEADER))
        .await?;
    Ok(plain_text(StatusCode::OK, "Disconnected avatar".to_string()))
}
