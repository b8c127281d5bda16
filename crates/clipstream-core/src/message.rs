//! Client message protocol.
//!
//! Text frames carry JSON control events; binary frames carry tagged media
//! (see [`crate::wire`]). Control events are decoded once, here, into typed
//! variants. Anything that does not match a known shape is rejected with a
//! [`DecodeError`] instead of being poked at field by field.

use serde::{Deserialize, Serialize};

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Requested transition for one substream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Start,
    Stop,
}

/// A decoded inbound control event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// `{"type":"streamStateChange","streamType":"camera","action":"start"}`
    #[serde(rename_all = "camelCase")]
    StreamStateChange {
        stream_type: String,
        action: StreamAction,
    },
}

/// Control `type` values this server understands.
const KNOWN_TYPES: &[&str] = &["streamStateChange"];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("control message has no \"type\" field")]
    MissingType,
    #[error("unknown control message type {0:?}")]
    UnknownType(String),
    #[error("malformed {kind} message: {source}")]
    Malformed {
        kind: String,
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Unknown message types are ignored quietly; everything else is reported
    /// back to the client.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

/// Only used to classify a failed decode.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ControlMessage {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;
        let envelope: Envelope =
            serde_json::from_value(value.clone()).map_err(DecodeError::InvalidJson)?;
        let kind = envelope.kind.ok_or(DecodeError::MissingType)?;
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|source| DecodeError::Malformed { kind, source })
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// First message on every connection: `{"sessionId":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHello {
    pub session_id: String,
}

/// Server → client notifications after the hello.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A recording was opened for the substream.
    #[serde(rename_all = "camelCase")]
    StartAck {
        stream_type: String,
        clip_number: u32,
    },
    /// A clip was finalized and recorded in the session metadata.
    #[serde(rename_all = "camelCase")]
    EndAck {
        stream_type: String,
        clip_number: u32,
        file_name: String,
        start_time: f64,
        end_time: f64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Hello(SessionHello),
    Event(ServerEvent),
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Event(ServerEvent::Error {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ServerEvent> for OutboundMessage {
    fn from(event: ServerEvent) -> Self {
        Self::Event(event)
    }
}
