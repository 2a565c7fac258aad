use serde::Deserialize;
use std::fmt;
use std::time::Duration;

fn default_synthesis_voice() -> String {
    "en-US-AvaMultilingualNeural".to_string()
}

fn default_recognition_language() -> String {
    "en-US".to_string()
}

fn default_turn_timeout_secs() -> u64 {
    30
}

/// Credentials and endpoints for the speech service.
#[derive(Clone, Deserialize)]
pub struct SpeechConfig {
    /// Service region, e.g. `westeurope`.
    #[serde(default)]
    pub region: String,
    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    #[serde(default)]
    pub key: String,
    /// Private endpoint host used for relay tokens when the request does
    /// not name one.
    #[serde(default)]
    pub private_endpoint: Option<String>,
    /// Replaces `https://{region}.tts.speech.microsoft.com`.
    #[serde(default)]
    pub tts_base_url: Option<String>,
    /// Replaces `https://{region}.stt.speech.microsoft.com`.
    #[serde(default)]
    pub stt_base_url: Option<String>,
    /// Voice used when plain text is synthesized.
    #[serde(default = "default_synthesis_voice")]
    pub synthesis_voice: String,
    /// Locale for single-shot recognition.
    #[serde(default = "default_recognition_language")]
    pub recognition_language: String,
    /// Upper bound on a single synthesis turn.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            key: String::new(),
            private_endpoint: None,
            tts_base_url: None,
            stt_base_url: None,
            synthesis_voice: default_synthesis_voice(),
            recognition_language: default_recognition_language(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("region", &self.region)
            .field("key", &"[REDACTED]")
            .field("private_endpoint", &self.private_endpoint)
            .field("tts_base_url", &self.tts_base_url)
            .field("stt_base_url", &self.stt_base_url)
            .field("synthesis_voice", &self.synthesis_voice)
            .field("recognition_language", &self.recognition_language)
            .field("turn_timeout_secs", &self.turn_timeout_secs)
            .finish()
    }
}

impl SpeechConfig {
    pub fn new(region: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_tts_base_url(mut self, url: impl Into<String>) -> Self {
        self.tts_base_url = Some(url.into());
        self
    }

    pub fn with_stt_base_url(mut self, url: impl Into<String>) -> Self {
        self.stt_base_url = Some(url.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.key.is_empty() && (!self.region.is_empty() || self.tts_base_url.is_some())
    }

    /// Base URL of the text-to-speech host, without a trailing slash.
    pub fn tts_host(&self) -> String {
        match &self.tts_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.tts.speech.microsoft.com", self.region),
        }
    }

    /// Base URL of the speech-to-text host, without a trailing slash.
    pub fn stt_host(&self) -> String {
        match &self.stt_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.stt.speech.microsoft.com", self.region),
        }
    }

    /// Websocket URL of the streaming synthesis endpoint with talking
    /// avatar support enabled.
    pub fn synthesis_websocket_url(&self) -> String {
        let host = self.tts_host();
        let host = if let Some(rest) = host.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = host.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            host
        };
        format!("{host}/cognitiveservices/websocket/v1?enableTalkingAvatar=true")
    }

    /// Short-audio recognition endpoint (query string excluded).
    pub fn recognition_url(&self) -> String {
        format!(
            "{}/speech/recognition/conversation/cognitiveservices/v1",
            self.stt_host()
        )
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}
