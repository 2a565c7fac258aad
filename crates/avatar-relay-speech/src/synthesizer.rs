//! Streaming synthesis connection that drives the talking avatar.

use crate::avatar::AvatarSessionConfig;
use crate::config::SpeechConfig;
use crate::error::{CancellationReason, SpeechError};
use crate::protocol::{
    encode_text, new_request_id, parse_binary, parse_text, text_to_ssml, CONTENT_TYPE_JSON,
    CONTENT_TYPE_SSML, PATH_SPEECH_CONFIG, PATH_SSML, PATH_SYNTHESIS_CONTEXT, PATH_TURN_END,
    PATH_TURN_START,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a synthesis turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed,
    Canceled {
        reason: CancellationReason,
        details: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    pub result_id: String,
    pub outcome: SynthesisOutcome,
}

impl SynthesisResult {
    pub fn completed(result_id: impl Into<String>) -> Self {
        Self {
            result_id: result_id.into(),
            outcome: SynthesisOutcome::Completed,
        }
    }

    /// Returns the result id, or the cancellation when the vendor cancelled
    /// the turn because of an error. Other cancellations still count as a
    /// result.
    pub fn into_result_id(self) -> Result<String, SpeechError> {
        match self.outcome {
            SynthesisOutcome::Canceled {
                reason: CancellationReason::Error,
                details,
            } => Err(SpeechError::Canceled {
                reason: CancellationReason::Error,
                details,
            }),
            SynthesisOutcome::Canceled { reason, .. } => {
                debug!(result_id = %self.result_id, %reason, "synthesis canceled without error");
                Ok(self.result_id)
            }
            SynthesisOutcome::Completed => Ok(self.result_id),
        }
    }
}

/// An open streaming synthesis connection.
#[async_trait]
pub trait SynthesisConnection: Send + Sync {
    /// Synthesizes plain text with the configured voice.
    async fn speak_text(&self, text: &str) -> Result<SynthesisResult, SpeechError>;

    /// Synthesizes a literal SSML document.
    async fn speak_ssml(&self, ssml: &str) -> Result<SynthesisResult, SpeechError>;

    /// Body of the first `turn.start` message seen on this connection.
    fn turn_start_message(&self) -> Option<String>;

    /// True once the connection was closed by either side.
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), SpeechError>;
}

/// Opens synthesis connections carrying an avatar configuration.
#[async_trait]
pub trait SynthesisConnector: Send + Sync {
    async fn open(
        &self,
        context: &AvatarSessionConfig,
    ) -> Result<Box<dyn SynthesisConnection>, SpeechError>;
}

/// Connector for the vendor's synthesis websocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: SpeechConfig,
}

impl WebSocketConnector {
    pub fn new(config: SpeechConfig) -> Self {
        Self { config }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SpeechError> {
    HeaderValue::from_str(value)
        .map_err(|e| SpeechError::Config(format!("invalid header value: {e}")))
}

/// `speech.config` body with the avatar configuration merged into its
/// `context` property.
fn speech_config_body(context: &AvatarSessionConfig) -> Result<String, SpeechError> {
    let mut context = serde_json::to_value(context)
        .map_err(|e| SpeechError::Protocol(format!("failed to encode avatar config: {e}")))?;
    if let Value::Object(map) = &mut context {
        map.insert(
            "system".to_string(),
            json!({
                "name": "SpeechSDK",
                "version": env!("CARGO_PKG_VERSION"),
                "build": "Rust",
                "lang": "Rust",
            }),
        );
        map.insert(
            "os".to_string(),
            json!({
                "platform": std::env::consts::OS,
                "name": std::env::consts::FAMILY,
                "version": std::env::consts::ARCH,
            }),
        );
    }
    Ok(json!({ "context": context }).to_string())
}

fn synthesis_context_body() -> String {
    json!({
        "synthesis": {
            "audio": {
                "metadataOptions": {
                    "sentenceBoundaryEnabled": false,
                    "wordBoundaryEnabled": false,
                },
                "outputFormat": "riff-24khz-16bit-mono-pcm",
            },
            "language": { "autoDetection": false },
        }
    })
    .to_string()
}

#[async_trait]
impl SynthesisConnector for WebSocketConnector {
    async fn open(
        &self,
        context: &AvatarSessionConfig,
    ) -> Result<Box<dyn SynthesisConnection>, SpeechError> {
        let url = self.config.synthesis_websocket_url();
        let connection_id = new_request_id();

        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Ocp-Apim-Subscription-Key", header_value(&self.config.key)?);
        request
            .headers_mut()
            .insert("X-ConnectionId", header_value(&connection_id)?);

        let (mut stream, _) = tokio_tungstenite::connect_async(request).await?;
        info!(connection_id = %connection_id, "opened streaming synthesis connection");

        // The avatar configuration rides on speech.config and must precede
        // the first turn.
        let frame = encode_text(
            PATH_SPEECH_CONFIG,
            &connection_id,
            CONTENT_TYPE_JSON,
            &speech_config_body(context)?,
        );
        stream.send(Message::Text(frame.into())).await?;

        Ok(Box::new(WebSocketConnection {
            stream: tokio::sync::Mutex::new(stream),
            connection_id,
            voice: self.config.synthesis_voice.clone(),
            turn_timeout: self.config.turn_timeout(),
            turn_start: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Live websocket synthesis connection. Turns are serialised.
pub struct WebSocketConnection {
    stream: tokio::sync::Mutex<WsStream>,
    connection_id: String,
    voice: String,
    turn_timeout: Duration,
    turn_start: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl WebSocketConnection {
    fn record_turn_start(&self, body: String) {
        let mut slot = self.turn_start.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(body);
        }
    }

    async fn run_turn(&self, ssml: &str) -> Result<SynthesisResult, SpeechError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpeechError::NotConnected);
        }

        let request_id = new_request_id();
        let mut stream = self.stream.lock().await;

        let context = encode_text(
            PATH_SYNTHESIS_CONTEXT,
            &request_id,
            CONTENT_TYPE_JSON,
            &synthesis_context_body(),
        );
        stream.send(Message::Text(context.into())).await?;
        let ssml = encode_text(PATH_SSML, &request_id, CONTENT_TYPE_SSML, ssml);
        stream.send(Message::Text(ssml.into())).await?;

        let outcome = tokio::time::timeout(
            self.turn_timeout,
            self.await_turn_end(&mut *stream, &request_id),
        )
        .await
        .map_err(|_| SpeechError::Timeout(self.turn_timeout.as_secs()))??;

        debug!(connection_id = %self.connection_id, result_id = %request_id, ?outcome, "synthesis turn finished");
        Ok(SynthesisResult {
            result_id: request_id,
            outcome,
        })
    }

    async fn await_turn_end(
        &self,
        stream: &mut WsStream,
        request_id: &str,
    ) -> Result<SynthesisOutcome, SpeechError> {
        while let Some(frame) = stream.next().await {
            match frame? {
                Message::Text(text) => {
                    let message = parse_text(text.as_str())?;
                    if message
                        .request_id()
                        .is_some_and(|id| !id.eq_ignore_ascii_case(request_id))
                    {
                        continue;
                    }
                    match message.path() {
                        Some(PATH_TURN_START) => self.record_turn_start(message.body_text()),
                        Some(PATH_TURN_END) => return Ok(SynthesisOutcome::Completed),
                        other => trace!(path = ?other, "ignoring synthesis message"),
                    }
                }
                Message::Binary(data) => {
                    let message = parse_binary(&data)?;
                    trace!(path = ?message.path(), bytes = message.body.len(), "ignoring binary frame");
                }
                Message::Close(frame) => {
                    self.closed.store(true, Ordering::Release);
                    let details = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "connection closed by speech service".to_string());
                    warn!(connection_id = %self.connection_id, %details, "synthesis connection closed during turn");
                    return Ok(SynthesisOutcome::Canceled {
                        reason: CancellationReason::Error,
                        details,
                    });
                }
                _ => {}
            }
        }

        self.closed.store(true, Ordering::Release);
        Ok(SynthesisOutcome::Canceled {
            reason: CancellationReason::Error,
            details: "connection closed by speech service".to_string(),
        })
    }
}

#[async_trait]
impl SynthesisConnection for WebSocketConnection {
    async fn speak_text(&self, text: &str) -> Result<SynthesisResult, SpeechError> {
        self.run_turn(&text_to_ssml(text, &self.voice)).await
    }

    async fn speak_ssml(&self, ssml: &str) -> Result<SynthesisResult, SpeechError> {
        self.run_turn(ssml).await
    }

    fn turn_start_message(&self) -> Option<String> {
        self.turn_start
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), SpeechError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut stream = self.stream.lock().await;
        match stream.close(None).await {
            Ok(()) => {}
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => {}
            Err(e) => return Err(e.into()),
        }
        info!(connection_id = %self.connection_id, "closed streaming synthesis connection");
        Ok(())
    }
}
