use crate::config::SpeechConfig;
use crate::error::SpeechError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const PRIVATE_ENDPOINT_TOKEN_PATH: &str = "/tts/cognitiveservices/avatar/relay/token/v1";
const REGIONAL_TOKEN_PATH: &str = "/cognitiveservices/avatar/relay/token/v1";

/// Short-lived TURN relay credential for the avatar's media connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceToken {
    #[serde(rename = "Urls")]
    pub urls: Vec<String>,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
}

impl IceToken {
    /// Parses the relay token body returned by the speech service.
    pub fn parse(body: &str) -> Result<Self, SpeechError> {
        let token: IceToken = serde_json::from_str(body)
            .map_err(|e| SpeechError::Protocol(format!("malformed relay token: {e}")))?;
        if token.urls.is_empty() {
            return Err(SpeechError::Protocol(
                "relay token carries no relay URLs".to_string(),
            ));
        }
        Ok(token)
    }

    /// First relay URL; the avatar service only consumes one.
    pub fn primary_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or_default()
    }
}

/// Vendor response relayed to the caller unchanged.
#[derive(Debug, Clone)]
pub struct RelayTokenResponse {
    pub status: u16,
    pub body: String,
}

impl RelayTokenResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Builds the relay token URL, preferring a private endpoint when one is
/// given. Private endpoints without an `https://` prefix get one.
pub fn relay_token_url(config: &SpeechConfig, private_endpoint: Option<&str>) -> String {
    let private_endpoint = private_endpoint
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .or(config.private_endpoint.as_deref().filter(|e| !e.is_empty()));

    match private_endpoint {
        Some(endpoint) => {
            let endpoint = endpoint.trim_end_matches('/');
            if endpoint.starts_with("https://") {
                format!("{endpoint}{PRIVATE_ENDPOINT_TOKEN_PATH}")
            } else {
                format!("https://{endpoint}{PRIVATE_ENDPOINT_TOKEN_PATH}")
            }
        }
        None => format!("{}{REGIONAL_TOKEN_PATH}", config.tts_host()),
    }
}

/// Fetches avatar relay tokens from the speech service.
#[derive(Debug, Clone)]
pub struct RelayTokenClient {
    http: reqwest::Client,
    config: SpeechConfig,
}

impl RelayTokenClient {
    pub fn new(config: SpeechConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: SpeechConfig) -> Self {
        Self { http, config }
    }

    /// Requests a relay token. The vendor's status and body come back as-is;
    /// only transport failures are errors.
    pub async fn fetch(
        &self,
        private_endpoint: Option<&str>,
    ) -> Result<RelayTokenResponse, SpeechError> {
        let url = relay_token_url(&self.config, private_endpoint);
        debug!(url = %url, "requesting avatar relay token");

        let response = self
            .http
            .get(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.key)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 {
            warn!(status, "relay token request rejected by speech service");
        }
        Ok(RelayTokenResponse { status, body })
    }
}
