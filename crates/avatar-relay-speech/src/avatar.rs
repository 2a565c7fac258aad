//! Typed avatar session configuration.
//!
//! Serialises to the nested document the synthesis service expects under
//! the `context` property of `speech.config`.

use crate::ice::IceToken;
use serde::{Deserialize, Serialize};

/// Streaming protocol used for the avatar video.
pub const WEBRTC_PROTOCOL: &str = "WebRTC";

/// Default output bitrate in bits per second.
pub const DEFAULT_BITRATE: u64 = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Crop rectangle applied to the rendered avatar frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl Default for CropRect {
    /// Full 1920x1080 frame.
    fn default() -> Self {
        Self {
            top_left: Point { x: 0, y: 0 },
            bottom_right: Point { x: 1920, y: 1080 },
        }
    }
}

/// Video format of the avatar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarVideoFormat {
    #[serde(default)]
    pub crop: CropRect,
    #[serde(default = "default_bitrate")]
    pub bitrate: u64,
}

fn default_bitrate() -> u64 {
    DEFAULT_BITRATE
}

impl Default for AvatarVideoFormat {
    fn default() -> Self {
        Self {
            crop: CropRect::default(),
            bitrate: DEFAULT_BITRATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl From<&IceToken> for IceServer {
    fn from(token: &IceToken) -> Self {
        Self {
            urls: vec![token.primary_url().to_string()],
            username: token.username.clone(),
            credential: token.password.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcConfig {
    /// The browser's local session description, forwarded untouched.
    pub client_description: String,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProtocol {
    pub name: String,
    pub webrtc_config: WebRtcConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Background {
    pub color: String,
}

/// Character, style and background of the rendered avatar. Unset fields
/// are left out so the service applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkingAvatar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarVideo {
    pub protocol: VideoProtocol,
    pub format: AvatarVideoFormat,
    pub talking_avatar: TalkingAvatar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarSynthesis {
    pub video: AvatarVideo,
}

/// Root of the avatar configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarSessionConfig {
    pub synthesis: AvatarSynthesis,
}

impl AvatarSessionConfig {
    pub fn new(
        local_sdp: impl Into<String>,
        ice_token: &IceToken,
        avatar: TalkingAvatar,
        format: AvatarVideoFormat,
    ) -> Self {
        Self {
            synthesis: AvatarSynthesis {
                video: AvatarVideo {
                    protocol: VideoProtocol {
                        name: WEBRTC_PROTOCOL.to_string(),
                        webrtc_config: WebRtcConfig {
                            client_description: local_sdp.into(),
                            ice_servers: vec![IceServer::from(ice_token)],
                        },
                    },
                    format,
                    talking_avatar: avatar,
                },
            },
        }
    }
}
