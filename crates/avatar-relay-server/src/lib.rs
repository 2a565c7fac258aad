//! Avatar relay server library logic.

pub mod api;
pub mod api_avatar;
pub mod api_bot;
pub mod api_messages;
pub mod api_recognition;
pub mod config;

use avatar_relay_bot::DirectLineClient;
use avatar_relay_speech::{
    AudioSource, AvatarSessions, RelayTokenClient, SpeechRecognizer, SynthesisConnector,
    WebSocketConnector,
};
use avatar_relay_store::{CosmosClient, MessageLogReader};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay (ICE) token client for the speech service.
    pub relay_tokens: RelayTokenClient,
    /// Live avatar sessions and the most recent relay token.
    pub avatars: Arc<AvatarSessions>,
    /// Reader over the conversation message log.
    pub messages: MessageLogReader,
    /// Bot relay conversation bootstrap.
    pub bot: DirectLineClient,
    /// Single-shot recognizer bound to the server's audio input.
    pub recognizer: SpeechRecognizer,
    /// Directory holding the web client. Served only when it has an
    /// `index.html`.
    pub client_dir: String,
}

impl AppState {
    /// Builds the state from configuration with explicit synthesis and audio
    /// backends.
    pub fn with_backends(
        config: &Config,
        connector: Arc<dyn SynthesisConnector>,
        audio: Arc<dyn AudioSource>,
    ) -> Self {
        Self {
            relay_tokens: RelayTokenClient::new(config.speech.clone()),
            avatars: Arc::new(
                AvatarSessions::new(connector, config.avatar, &config.server.secret_key)
                    .with_limits(config.sessions),
            ),
            messages: MessageLogReader::new(CosmosClient::new(config.store.clone())),
            bot: DirectLineClient::new(config.bot.clone()),
            recognizer: SpeechRecognizer::new(config.speech.clone(), audio),
            client_dir: config.server.client_dir.clone(),
        }
    }

    /// Builds the state with the vendor websocket connector and the default
    /// audio source for this build.
    pub fn from_config(config: &Config) -> Self {
        Self::with_backends(
            config,
            Arc::new(WebSocketConnector::new(config.speech.clone())),
            default_audio_source(),
        )
    }
}

#[cfg(feature = "microphone")]
fn default_audio_source() -> Arc<dyn AudioSource> {
    Arc::new(avatar_relay_speech::MicrophoneSource::default())
}

#[cfg(not(feature = "microphone"))]
fn default_audio_source() -> Arc<dyn AudioSource> {
    Arc::new(avatar_relay_speech::UnavailableSource)
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/api/getIceToken",
            get(api_avatar::get_ice_token_handler),
        )
        .route(
            "/api/connectAvatar",
            post(api_avatar::connect_avatar_handler),
        )
        .route("/api/speak", post(api_avatar::speak_handler))
        .route(
            "/api/disconnectAvatar",
            post(api_avatar::disconnect_avatar_handler),
        )
        .route(
            "/api/get-latest-message",
            get(api_messages::get_latest_message_handler),
        )
        .route("/convid", get(api_bot::convid_handler))
        .route(
            "/start-recognition",
            post(api_recognition::start_recognition_handler),
        );

    // Serve the web client if its directory exists.
    let client_dir = state.client_dir.as_str();
    let router = if std::path::Path::new(client_dir).join("index.html").exists() {
        if !std::path::Path::new(client_dir).is_absolute() {
            tracing::warn!(
                path = %client_dir,
                "client directory is relative, static file serving depends on the working directory"
            );
        }
        tracing::info!(path = %client_dir, "serving client static files");
        let index = format!("{}/index.html", client_dir);
        router.fallback_service(ServeDir::new(client_dir).fallback(ServeFile::new(index)))
    } else {
        tracing::info!(path = %client_dir, "client directory not found, skipping static file serving");
        router
    };

    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static("avatarsessionid")]),
        )
        .layer(Extension(Arc::new(state)))
}
