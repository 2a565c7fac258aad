//! Single-shot speech recognition against the short-audio REST endpoint.

use crate::capture::{AudioSource, CapturedAudio};
use crate::config::SpeechConfig;
use crate::error::{CancellationReason, SpeechError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Recognized(String),
    NoMatch,
    Canceled {
        reason: CancellationReason,
        details: String,
    },
    Other,
}

impl RecognitionOutcome {
    fn error(details: impl Into<String>) -> Self {
        RecognitionOutcome::Canceled {
            reason: CancellationReason::Error,
            details: details.into(),
        }
    }

    /// Text handed back to the caller for this outcome.
    pub fn into_text(self) -> String {
        match self {
            RecognitionOutcome::Recognized(text) => text,
            RecognitionOutcome::NoMatch => "No speech could be recognized.".to_string(),
            RecognitionOutcome::Canceled { reason, details } => {
                format!("Speech Recognition canceled: {reason}. Error details: {details}")
            }
            RecognitionOutcome::Other => "An unexpected error occurred.".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShortAudioResponse {
    #[serde(rename = "RecognitionStatus")]
    status: String,
    #[serde(rename = "DisplayText", default)]
    display_text: Option<String>,
}

impl ShortAudioResponse {
    fn into_outcome(self) -> RecognitionOutcome {
        match self.status.as_str() {
            "Success" => RecognitionOutcome::Recognized(self.display_text.unwrap_or_default()),
            "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => RecognitionOutcome::NoMatch,
            "Error" => RecognitionOutcome::error("the recognition service reported an error"),
            other => {
                debug!(status = other, "unrecognised recognition status");
                RecognitionOutcome::Other
            }
        }
    }
}

/// Captures one utterance from an [`AudioSource`] and transcribes it.
#[derive(Clone)]
pub struct SpeechRecognizer {
    http: reqwest::Client,
    config: SpeechConfig,
    source: Arc<dyn AudioSource>,
}

impl std::fmt::Debug for SpeechRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechRecognizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SpeechRecognizer {
    pub fn new(config: SpeechConfig, source: Arc<dyn AudioSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            source,
        }
    }

    /// Listens for a single utterance and transcribes it. Every failure is
    /// folded into [`RecognitionOutcome::Canceled`].
    pub async fn recognize_once(&self) -> RecognitionOutcome {
        let source = Arc::clone(&self.source);
        let audio = match tokio::task::spawn_blocking(move || source.capture_utterance()).await {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => {
                warn!("audio capture failed: {e}");
                return RecognitionOutcome::error(e.to_string());
            }
            Err(e) => {
                warn!("audio capture task failed: {e}");
                return RecognitionOutcome::error("audio capture was interrupted");
            }
        };

        match self.transcribe(&audio).await {
            Ok(outcome) => outcome,
            Err(SpeechError::Upstream { status, body }) => {
                RecognitionOutcome::error(format!("status {status}: {}", body.trim()))
            }
            Err(e) => {
                warn!("recognition request failed: {e}");
                RecognitionOutcome::error(e.to_string())
            }
        }
    }

    /// Sends captured audio to the recognition endpoint.
    pub async fn transcribe(&self, audio: &CapturedAudio) -> Result<RecognitionOutcome, SpeechError> {
        if audio.is_empty() {
            return Ok(RecognitionOutcome::NoMatch);
        }

        let wav = audio.to_wav()?;
        let response = self
            .http
            .post(self.config.recognition_url())
            .query(&[
                ("language", self.config.recognition_language.as_str()),
                ("format", "simple"),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.config.key)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!(
                    "audio/wav; codecs=audio/pcm; samplerate={}",
                    audio.sample_rate
                ),
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ShortAudioResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Protocol(format!("malformed recognition response: {e}")))?;
        Ok(parsed.into_outcome())
    }
}
