//! Registry of live avatar sessions.
//!
//! Each `connect` opens its own synthesis connection and hands back a signed
//! session handle. `speak` and `disconnect` address a session by handle; a
//! call without a handle targets the most recently connected session so a
//! single-avatar client never has to track one.
//!
//! A session becomes *claimed* the first time it is addressed by its handle.
//! An unclaimed session is only reachable through the handle-less slot, so a
//! new connect replaces it. Closed, idle and surplus sessions are swept on
//! every connect.

use crate::avatar::{AvatarSessionConfig, AvatarVideoFormat, Background, TalkingAvatar};
use crate::error::SpeechError;
use crate::ice::IceToken;
use crate::synthesizer::{SynthesisConnection, SynthesisConnector};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Browser-side parameters of an avatar connect call. Unset avatar fields
/// are left to the service defaults.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub local_sdp: String,
    pub character: Option<String>,
    pub style: Option<String>,
    pub background_color: Option<String>,
}

/// A freshly negotiated avatar session.
#[derive(Debug, Clone)]
pub struct ConnectedAvatar {
    /// Signed handle for subsequent `speak`/`disconnect` calls.
    pub session_id: String,
    /// Remote session description to hand to the browser's peer connection.
    pub remote_sdp: String,
    /// Result id of the negotiation turn.
    pub result_id: String,
}

/// Bounds on the number and lifetime of live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Live sessions kept at most; the least recently used goes first.
    pub max_sessions: usize,
    /// Sessions untouched for this long are closed on the next connect.
    pub idle_timeout_secs: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            idle_timeout_secs: 900,
        }
    }
}

impl SessionLimits {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

type SharedConnection = Arc<dyn SynthesisConnection>;

struct SessionEntry {
    connection: SharedConnection,
    claimed: bool,
    last_used: Instant,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, SessionEntry>,
    latest: Option<String>,
}

impl Registry {
    fn remove(&mut self, id: &str) -> Option<SharedConnection> {
        let removed = self.entries.remove(id)?;
        if self.latest.as_deref() == Some(id) {
            self.latest = self
                .entries
                .iter()
                .filter(|(_, entry)| !entry.connection.is_closed())
                .max_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
        }
        Some(removed.connection)
    }

    /// Drops sessions a new connect supersedes and returns their connections.
    fn sweep(&mut self, limits: &SessionLimits, now: Instant) -> Vec<(String, SharedConnection)> {
        let mut doomed: Vec<String> = Vec::new();

        if let Some(latest) = &self.latest {
            if self.entries.get(latest).is_some_and(|e| !e.claimed) {
                doomed.push(latest.clone());
            }
        }

        let idle_timeout = limits.idle_timeout();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(id, entry)| {
                !doomed.contains(id)
                    && (entry.connection.is_closed()
                        || now.duration_since(entry.last_used) >= idle_timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();
        doomed.extend(stale);

        let mut evicted: Vec<(String, SharedConnection)> = doomed
            .into_iter()
            .filter_map(|id| self.remove(&id).map(|c| (id, c)))
            .collect();

        // Leave room for the session about to be inserted.
        let keep = limits.max_sessions.max(1) - 1;
        while self.entries.len() > keep {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(connection) = self.remove(&oldest) {
                evicted.push((oldest, connection));
            }
        }
        evicted
    }
}

pub struct AvatarSessions {
    connector: Arc<dyn SynthesisConnector>,
    format: AvatarVideoFormat,
    limits: SessionLimits,
    signing_key: [u8; 32],
    ice_token: RwLock<Option<IceToken>>,
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for AvatarSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarSessions")
            .field("format", &self.format)
            .field("limits", &self.limits)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

// All lock acquisitions below are brief map/slot operations that never span
// an `.await`. A poisoned lock only means a panicked writer; the data is
// still a valid map, so recover it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

/// Pulls `webrtc.connectionString` out of a `turn.start` body.
pub fn extract_remote_description(turn_start: Option<&str>) -> Result<String, SpeechError> {
    let body = turn_start.ok_or(SpeechError::MissingRemoteDescription)?;
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|_| SpeechError::MissingRemoteDescription)?;
    value
        .get("webrtc")
        .and_then(|w| w.get("connectionString"))
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or(SpeechError::MissingRemoteDescription)
}

impl AvatarSessions {
    /// Creates an empty registry. `secret` keys the session handle signatures.
    pub fn new(
        connector: Arc<dyn SynthesisConnector>,
        format: AvatarVideoFormat,
        secret: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"avatar-relay-session-v1:");
        hasher.update(secret.as_bytes());
        let mut signing_key = [0u8; 32];
        signing_key.copy_from_slice(&hasher.finalize());

        Self {
            connector,
            format,
            limits: SessionLimits::default(),
            signing_key,
            ice_token: RwLock::new(None),
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Remembers the most recently fetched relay token for the next connect.
    pub fn store_ice_token(&self, token: IceToken) {
        *write(&self.ice_token) = Some(token);
    }

    pub fn ice_token(&self) -> Option<IceToken> {
        read(&self.ice_token).clone()
    }

    pub fn session_count(&self) -> usize {
        read(&self.registry).entries.len()
    }

    fn sign(&self, id: &str) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.signing_key).expect("HMAC key length is valid");
        mac.update(id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn issue_handle(&self, id: &str) -> String {
        format!("{id}.{}", self.sign(id))
    }

    fn verify_handle(&self, handle: &str) -> Result<String, SpeechError> {
        let (id, signature) = handle
            .trim()
            .split_once('.')
            .ok_or(SpeechError::InvalidSession)?;
        let provided = hex::decode(signature).map_err(|_| SpeechError::InvalidSession)?;

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.signing_key).expect("HMAC key length is valid");
        mac.update(id.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| SpeechError::InvalidSession)?;
        Ok(id.to_string())
    }

    /// Looks a session up and marks it used. Addressing a session by handle
    /// claims it.
    fn resolve(&self, handle: Option<&str>) -> Result<(String, SharedConnection), SpeechError> {
        let by_handle = match handle.filter(|h| !h.trim().is_empty()) {
            Some(handle) => Some(self.verify_handle(handle)?),
            None => None,
        };

        let claimed = by_handle.is_some();
        let mut registry = write(&self.registry);
        let id = match by_handle {
            Some(id) => id,
            None => registry.latest.clone().ok_or(SpeechError::NotConnected)?,
        };
        let entry = registry
            .entries
            .get_mut(&id)
            .ok_or(SpeechError::NotConnected)?;
        entry.last_used = Instant::now();
        entry.claimed |= claimed;
        let connection = entry.connection.clone();
        Ok((id, connection))
    }

    fn forget(&self, id: &str) -> Option<SharedConnection> {
        write(&self.registry).remove(id)
    }

    /// Opens a synthesis connection carrying the avatar configuration and
    /// forces negotiation with an empty synthesis turn.
    ///
    /// Fails with [`SpeechError::MissingIceToken`] when no relay token has
    /// been fetched yet. A failed connect leaves no session behind and keeps
    /// the previous ones intact. A successful one closes the unclaimed
    /// previous session along with any closed, idle or surplus ones.
    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectedAvatar, SpeechError> {
        let token = self.ice_token().ok_or(SpeechError::MissingIceToken)?;

        let context = AvatarSessionConfig::new(
            request.local_sdp,
            &token,
            TalkingAvatar {
                character: request.character,
                style: request.style,
                background: request.background_color.map(|color| Background { color }),
            },
            self.format,
        );

        let connection: SharedConnection = Arc::from(self.connector.open(&context).await?);

        let negotiated = async {
            let result = connection.speak_text("").await?;
            let result_id = result.into_result_id()?;
            let remote_sdp =
                extract_remote_description(connection.turn_start_message().as_deref())?;
            Ok::<_, SpeechError>((result_id, remote_sdp))
        }
        .await;

        let (result_id, remote_sdp) = match negotiated {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!("failed to close synthesis connection after failed connect: {close_err}");
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4().simple().to_string();
        let evicted = {
            let mut registry = write(&self.registry);
            let now = Instant::now();
            let evicted = registry.sweep(&self.limits, now);
            registry.entries.insert(
                id.clone(),
                SessionEntry {
                    connection,
                    claimed: false,
                    last_used: now,
                },
            );
            registry.latest = Some(id.clone());
            evicted
        };
        info!(session = %id, result_id = %result_id, "avatar session connected");

        for (old, connection) in evicted {
            match connection.close().await {
                Ok(()) => info!(session = %old, "evicted avatar session"),
                Err(e) => warn!(session = %old, "failed to close evicted avatar session: {e}"),
            }
        }

        Ok(ConnectedAvatar {
            session_id: self.issue_handle(&id),
            remote_sdp,
            result_id,
        })
    }

    /// Speaks literal SSML on a connected session and returns the result id.
    pub async fn speak(&self, handle: Option<&str>, ssml: &str) -> Result<String, SpeechError> {
        let (id, connection) = self.resolve(handle)?;
        match connection.speak_ssml(ssml).await {
            Ok(result) => result.into_result_id(),
            Err(SpeechError::NotConnected) => {
                // The vendor dropped the connection underneath us.
                self.forget(&id);
                Err(SpeechError::NotConnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Closes a session's synthesis connection and drops it from the registry.
    /// The handle-less slot falls back to the most recently used live session.
    pub async fn disconnect(&self, handle: Option<&str>) -> Result<(), SpeechError> {
        let (id, _) = self.resolve(handle)?;
        let connection = self.forget(&id).ok_or(SpeechError::NotConnected)?;
        connection.close().await?;
        info!(session = %id, "avatar session disconnected");
        Ok(())
    }
}
