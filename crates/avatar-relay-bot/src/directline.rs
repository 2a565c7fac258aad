use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://directline.botframework.com";

#[derive(Error, Debug)]
pub enum BotError {
    #[error("bot relay request failed: {0}")]
    Transport(String),

    #[error("bot relay returned a non-JSON body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::Transport(e.to_string())
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Clone, Deserialize)]
pub struct DirectLineConfig {
    /// Channel secret used as the bearer credential.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for DirectLineConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            base_url: default_base_url(),
        }
    }
}

impl fmt::Debug for DirectLineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectLineConfig")
            .field("secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A freshly started conversation, relayed to the client as-is.
///
/// Fields are kept as raw JSON so whatever the relay sends (including
/// nothing, which becomes `null`) passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSession {
    pub conversation_id: Value,
    pub token: Value,
    pub expires_in: Value,
}

impl ConversationSession {
    fn from_response(body: &Value) -> Self {
        let field = |name: &str| body.get(name).cloned().unwrap_or(Value::Null);
        Self {
            conversation_id: field("conversationId"),
            token: field("token"),
            expires_in: field("expires_in"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectLineClient {
    http: reqwest::Client,
    config: DirectLineConfig,
}

impl DirectLineClient {
    pub fn new(config: DirectLineConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: DirectLineConfig) -> Self {
        Self { http, config }
    }

    fn conversations_url(&self) -> String {
        format!(
            "{}/v3/directline/conversations",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Starts a conversation. The response status is not inspected; an error
    /// body simply yields null fields.
    pub async fn start_conversation(&self) -> Result<ConversationSession, BotError> {
        let response = self
            .http
            .post(self.conversations_url())
            .bearer_auth(&self.config.secret)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BotError::Decode(e.to_string()))?;
        debug!(status = status.as_u16(), "bot relay conversation response");

        Ok(ConversationSession::from_response(&body))
    }
}
