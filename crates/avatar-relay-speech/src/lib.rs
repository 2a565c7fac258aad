//! Speech vendor surface for the avatar relay.
//!
//! Fetches relay (ICE) credentials for the avatar video stream, opens the
//! streaming synthesis connection that negotiates the avatar's WebRTC
//! session, keeps track of live avatar sessions, and runs single-shot
//! speech recognition against the short-audio REST endpoint.
//!
//! Speech synthesis, recognition and media negotiation stay on the vendor
//! side; this crate only speaks their wire formats.

pub mod avatar;
pub mod capture;
pub mod config;
pub mod error;
pub mod ice;
pub mod protocol;
pub mod recognizer;
pub mod session;
pub mod synthesizer;

pub use avatar::{AvatarSessionConfig, AvatarVideoFormat, CropRect, TalkingAvatar};
pub use config::SpeechConfig;
pub use error::{CancellationReason, SpeechError};
pub use ice::{IceToken, RelayTokenClient, RelayTokenResponse};
pub use capture::{AudioSource, CapturedAudio, UnavailableSource, UtteranceLimits};
pub use recognizer::{RecognitionOutcome, SpeechRecognizer};
pub use session::{AvatarSessions, ConnectRequest, ConnectedAvatar, SessionLimits};
pub use synthesizer::{
    SynthesisConnection, SynthesisConnector, SynthesisOutcome, SynthesisResult,
    WebSocketConnector,
};

#[cfg(feature = "microphone")]
pub use capture::MicrophoneSource;
