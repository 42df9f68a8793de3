//! Telephony bridge wire protocol (§4.7), matching the event shapes
//! `websocket.py::handle_websocket` switches on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected,
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Stop,
    /// Keepalive probe; answered with [`OutboundEvent::Pong`] rather than
    /// treated as an unrecognized event that tears the call down.
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded mu-law audio at 8kHz.
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMediaPayload,
    },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMediaPayload {
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: String, payload_base64: String) -> Self {
        Self::Media {
            stream_sid,
            media: OutboundMediaPayload { payload: payload_base64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_captures_stream_sid() {
        let json = r#"{"event":"start","start":{"streamSid":"MZabc123"}}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::Start { start } => assert_eq!(start.stream_sid, "MZabc123"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn media_event_carries_payload() {
        let json = r#"{"event":"media","media":{"payload":"abcd"}}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::Media { media } => assert_eq!(media.payload, "abcd"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ping_event_deserializes_without_a_payload() {
        let json = r#"{"event":"ping"}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, InboundEvent::Ping));
    }

    #[test]
    fn pong_event_serializes_with_its_tag_only() {
        let json = serde_json::to_string(&OutboundEvent::Pong).unwrap();
        assert_eq!(json, r#"{"event":"pong"}"#);
    }

    #[test]
    fn outbound_media_serializes_with_stream_sid_and_payload() {
        let event = OutboundEvent::media("MZ1".into(), "base64data".into());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"media\""));
        assert!(json.contains("\"streamSid\":\"MZ1\""));
        assert!(json.contains("\"payload\":\"base64data\""));
    }
}
