//! Wire messages for both transports.
//!
//! Text frames are JSON; audio travels as binary frames. Inbound messages
//! are parsed permissively (one loose struct per path, optional fields) so
//! a malformed or unknown unit can be dropped without touching the session.

use serde::{Deserialize, Serialize};

use crate::session::Speaker;

/// Event types shared by both paths.
pub const EVENT_RESPONSE_STARTED: &str = "response.started";
pub const EVENT_RESPONSE_FINISHED: &str = "response.finished";
pub const EVENT_TRANSCRIPT_DELTA: &str = "transcript.delta";

// ======================== Realtime (primary) ========================

/// First message on the realtime channel, announcing audio parameters.
#[derive(Debug, Serialize)]
pub struct SessionInit {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u8,
    pub audio_params: AudioParams,
}

#[derive(Debug, Serialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration: u64,
}

/// Barge-in instruction: stop the in-flight agent response.
#[derive(Debug, Serialize)]
pub struct ResponseInterrupt {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl ResponseInterrupt {
    pub fn new() -> Self {
        Self {
            msg_type: "response.interrupt",
        }
    }
}

impl Default for ResponseInterrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound event on the realtime data channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub speaker: Option<Speaker>,
    pub text: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
}

// ======================== Speech relay (fallback) ========================

/// One-shot handshake sent before any audio frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHandshake {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub codec: String,
    pub sample_rate: u32,
    pub language_hint: String,
}

impl RelayHandshake {
    pub fn new(sample_rate: u32, language_hint: &str) -> Self {
        Self {
            msg_type: "hello".to_string(),
            codec: "pcm_s16le".to_string(),
            sample_rate,
            language_hint: language_hint.to_string(),
        }
    }
}

/// Inbound JSON unit from the relay (transcript deltas and response
/// lifecycle markers; synthesized speech arrives as binary frames).
#[derive(Debug, Clone, Deserialize)]
pub struct RelayServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub speaker: Option<Speaker>,
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_handshake_uses_camel_case_keys() {
        let handshake = RelayHandshake::new(16000, "en");
        let json = serde_json::to_string(&handshake).unwrap();
        assert!(json.contains(r#""sampleRate":16000"#));
        assert!(json.contains(r#""languageHint":"en""#));
        assert!(json.contains(r#""codec":"pcm_s16le""#));
    }

    #[test]
    fn parses_speaker_tagged_delta() {
        let raw = r#"{"type":"transcript.delta","speaker":"candidate","text":"hello"}"#;
        let msg: RealtimeServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, EVENT_TRANSCRIPT_DELTA);
        assert_eq!(msg.speaker, Some(Speaker::Candidate));
        assert_eq!(msg.text.as_deref(), Some("hello"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = r#"{"type":"response.started","latency_ms":12}"#;
        let msg: RelayServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, EVENT_RESPONSE_STARTED);
    }

    #[test]
    fn interrupt_serializes_type_only() {
        let json = serde_json::to_string(&ResponseInterrupt::new()).unwrap();
        assert_eq!(json, r#"{"type":"response.interrupt"}"#);
    }
}
