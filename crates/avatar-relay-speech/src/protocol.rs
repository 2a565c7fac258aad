//! Framing for the speech service websocket protocol.
//!
//! Text frames are a CRLF-separated header block, an empty line, then the
//! body. Binary frames start with a big-endian `u16` header length, followed
//! by the header block and the payload.

use crate::error::SpeechError;
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

pub const PATH_SPEECH_CONFIG: &str = "speech.config";
pub const PATH_SYNTHESIS_CONTEXT: &str = "synthesis.context";
pub const PATH_SSML: &str = "ssml";
pub const PATH_TURN_START: &str = "turn.start";
pub const PATH_TURN_END: &str = "turn.end";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_SSML: &str = "application/ssml+xml";

const HEADER_PATH: &str = "Path";
const HEADER_REQUEST_ID: &str = "X-RequestId";
const HEADER_TIMESTAMP: &str = "X-Timestamp";
const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechMessage {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SpeechMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> Option<&str> {
        self.header(HEADER_PATH)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(HEADER_REQUEST_ID)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// New request id: a UUIDv4 without dashes.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encodes an outbound text frame.
pub fn encode_text(path: &str, request_id: &str, content_type: &str, body: &str) -> String {
    format!(
        "{HEADER_PATH}: {path}\r\n{HEADER_REQUEST_ID}: {request_id}\r\n{HEADER_TIMESTAMP}: {}\r\n{HEADER_CONTENT_TYPE}: {content_type}\r\n\r\n{body}",
        timestamp()
    )
}

fn parse_headers(block: &str) -> Result<Vec<(String, String)>, SpeechError> {
    block
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| SpeechError::Protocol(format!("malformed header line: {line}")))
        })
        .collect()
}

/// Decodes an inbound text frame.
pub fn parse_text(frame: &str) -> Result<SpeechMessage, SpeechError> {
    let (block, body) = match frame.split_once("\r\n\r\n") {
        Some(parts) => parts,
        None => (frame, ""),
    };
    Ok(SpeechMessage {
        headers: parse_headers(block)?,
        body: body.as_bytes().to_vec(),
    })
}

/// Decodes an inbound binary frame.
pub fn parse_binary(frame: &[u8]) -> Result<SpeechMessage, SpeechError> {
    if frame.len() < 2 {
        return Err(SpeechError::Protocol("binary frame too short".to_string()));
    }
    let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let header_end = 2 + header_len;
    if frame.len() < header_end {
        return Err(SpeechError::Protocol(format!(
            "binary frame header length {header_len} exceeds frame size {}",
            frame.len()
        )));
    }
    let block = std::str::from_utf8(&frame[2..header_end])
        .map_err(|_| SpeechError::Protocol("binary frame header is not UTF-8".to_string()))?;
    Ok(SpeechMessage {
        headers: parse_headers(block)?,
        body: frame[header_end..].to_vec(),
    })
}

/// Escapes text for inclusion in an SSML document.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps plain text in a single-voice SSML document.
pub fn text_to_ssml(text: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='en-US'><voice name='{}'>{}</voice></speak>",
        escape_xml(voice),
        escape_xml(text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_text_frame() {
        let frame = encode_text(PATH_SSML, "abc123", CONTENT_TYPE_SSML, "<speak/>");
        assert!(frame.starts_with("Path: ssml\r\nX-RequestId: abc123\r\n"));

        let message = parse_text(&frame).unwrap();
        assert_eq!(message.path(), Some("ssml"));
        assert_eq!(message.request_id(), Some("abc123"));
        assert_eq!(message.header("content-type"), Some(CONTENT_TYPE_SSML));
        assert_eq!(message.body_text(), "<speak/>");
    }

    #[test]
    fn parse_turn_start_with_json_body() {
        let frame = "X-RequestId:0F2A\r\nContent-Type:application/json; charset=utf-8\r\nPath:turn.start\r\n\r\n{\"webrtc\":{\"connectionString\":\"answer\"}}";
        let message = parse_text(frame).unwrap();
        assert_eq!(message.path(), Some(PATH_TURN_START));
        assert_eq!(message.request_id(), Some("0F2A"));
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["webrtc"]["connectionString"], "answer");
    }

    #[test]
    fn parse_binary_frame() {
        let header = b"Path:audio\r\nX-RequestId:42\r\n";
        let mut frame = (header.len() as u16).to_be_bytes().to_vec();
        frame.extend_from_slice(header);
        frame.extend_from_slice(&[1, 2, 3]);

        let message = parse_binary(&frame).unwrap();
        assert_eq!(message.path(), Some("audio"));
        assert_eq!(message.body, vec![1, 2, 3]);
    }

    #[test]
    fn parse_binary_rejects_truncated_header() {
        let frame = [0u8, 10, b'P'];
        assert!(matches!(parse_binary(&frame), Err(SpeechError::Protocol(_))));
    }

    #[test]
    fn request_ids_are_dashless() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }

    #[test]
    fn ssml_envelope_escapes_text() {
        let ssml = text_to_ssml("Tom & <Jerry>", "en-US-AvaMultilingualNeural");
        assert!(ssml.contains("<voice name='en-US-AvaMultilingualNeural'>Tom &amp; &lt;Jerry&gt;</voice>"));
    }

    #[test]
    fn empty_text_gives_empty_voice_element() {
        let ssml = text_to_ssml("", "v");
        assert!(ssml.contains("<voice name='v'></voice>"));
    }
}
