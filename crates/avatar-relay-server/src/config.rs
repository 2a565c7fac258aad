//! Server configuration loading from file and environment variables.

use avatar_relay_bot::DirectLineConfig;
use avatar_relay_speech::{AvatarVideoFormat, SessionLimits, SpeechConfig};
use avatar_relay_store::StoreConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech service credentials and endpoints.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Avatar video format.
    #[serde(default)]
    pub avatar: AvatarVideoFormat,

    /// Bounds on live avatar sessions.
    #[serde(default)]
    pub sessions: SessionLimits,

    /// Message log location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Bot relay channel.
    #[serde(default)]
    pub bot: DirectLineConfig,
}

/// Network configuration for the HTTP server.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Process secret key. Signs avatar session handles.
    #[serde(default)]
    pub secret_key: String,

    /// Directory holding the web client (`index.html` and assets).
    #[serde(default = "default_client_dir")]
    pub client_dir: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_key", &"[REDACTED]")
            .field("client_dir", &self.client_dir)
            .finish()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "avatar_relay_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5000
}

fn default_client_dir() -> String {
    "client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secret_key: String::new(),
            client_dir: default_client_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Applies environment variable overrides read through `var`.
///
/// - `AVATAR_RELAY_HOST`, `AVATAR_RELAY_PORT` override `server.host`/`server.port`
/// - `AVATAR_RELAY_CLIENT_DIR` overrides `server.client_dir`
/// - `AVATAR_RELAY_LOG_LEVEL` overrides `logging.level`
/// - `AVATAR_RELAY_LOG_JSON` overrides `logging.json` ("true" or "1" to enable)
/// - `BotSecretKey` overrides `server.secret_key`
/// - `SPEECH_REGION`, `SPEECH_KEY`, `SPEECH_PRIVATE_ENDPOINT` override `speech.*`
/// - `YOUR_COSMOS_DB_ENDPOINT`, `YOUR_COSMOS_DB_KEY`, `YourDatabaseName`,
///   `YourContainerName` override `store.*`
/// - `SECRET` overrides `bot.secret`
pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = var("AVATAR_RELAY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("AVATAR_RELAY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(dir) = var("AVATAR_RELAY_CLIENT_DIR") {
        config.server.client_dir = dir;
    }
    if let Some(level) = var("AVATAR_RELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("AVATAR_RELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(secret) = var("BotSecretKey") {
        config.server.secret_key = secret;
    }

    if let Some(region) = var("SPEECH_REGION") {
        config.speech.region = region;
    }
    if let Some(key) = var("SPEECH_KEY") {
        config.speech.key = key;
    }
    if let Some(endpoint) = var("SPEECH_PRIVATE_ENDPOINT").filter(|v| !v.trim().is_empty()) {
        config.speech.private_endpoint = Some(endpoint);
    }

    if let Some(endpoint) = var("YOUR_COSMOS_DB_ENDPOINT") {
        config.store.endpoint = endpoint;
    }
    if let Some(key) = var("YOUR_COSMOS_DB_KEY") {
        config.store.key = key;
    }
    if let Some(database) = var("YourDatabaseName") {
        config.store.database = database;
    }
    if let Some(container) = var("YourContainerName") {
        config.store.container = container;
    }

    if let Some(secret) = var("SECRET") {
        config.bot.secret = secret;
    }
}
