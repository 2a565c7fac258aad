use std::fmt;
use thiserror::Error;

/// Why the vendor cancelled a synthesis or recognition turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The service or the transport reported an error.
    Error,
    /// The input ended before a result was produced.
    EndOfStream,
    /// The caller cancelled the turn.
    CancelledByUser,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancellationReason::Error => "Error",
            CancellationReason::EndOfStream => "EndOfStream",
            CancellationReason::CancelledByUser => "CancelledByUser",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("speech service request failed: {0}")]
    Transport(String),

    #[error("speech service returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("synthesis canceled ({reason}): {details}")]
    Canceled {
        reason: CancellationReason,
        details: String,
    },

    #[error("no ICE token has been fetched; call getIceToken before connecting")]
    MissingIceToken,

    #[error("avatar is not connected")]
    NotConnected,

    #[error("invalid avatar session handle")]
    InvalidSession,

    #[error("remote session description missing from turn start message")]
    MissingRemoteDescription,

    #[error("speech protocol error: {0}")]
    Protocol(String),

    #[error("synthesis turn timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio capture error: {0}")]
    Audio(String),
}

impl From<reqwest::Error> for SpeechError {
    fn from(e: reqwest::Error) -> Self {
        SpeechError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SpeechError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SpeechError::Transport(e.to_string())
    }
}
