//! Wire frames.
//!
//! Every transport frame is one newline-free JSON object with a mandatory
//! `type` discriminator and, for application events, a `data` payload:
//!
//! ```json
//! {"type":"authenticate","userId":"u1"}
//! {"type":"new_message","data":{"conversationId":"c1","text":"hi"}}
//! ```
//!
//! Inbound frames are decoded into [`InboundFrame`]; the routing topic is
//! `data.conversationId` when present and [`GLOBAL_TOPIC`] otherwise.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ProtocolError;

/// Topic for frames that carry no conversation id.
pub const GLOBAL_TOPIC: &str = "global";

/// Topic that matches every frame regardless of its derived topic.
pub const WILDCARD_TOPIC: &str = "*";

/// Closed set of inbound frame kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Handshake completed.
    AuthSuccess,
    /// Heartbeat acknowledgement.
    Pong,
    /// A message was posted to a conversation.
    NewMessage,
    /// A reaction was added to or removed from a message.
    MessageReaction,
    /// Someone started or stopped typing.
    TypingIndicator,
    /// Notification feed entry.
    Notification,
}

impl FrameKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::AuthSuccess,
        Self::Pong,
        Self::NewMessage,
        Self::MessageReaction,
        Self::TypingIndicator,
        Self::Notification,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::Pong => "pong",
            Self::NewMessage => "new_message",
            Self::MessageReaction => "message_reaction",
            Self::TypingIndicator => "typing_indicator",
            Self::Notification => "notification",
        }
    }

    /// Look up a kind by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Session-level frames that are consumed by the session itself rather
    /// than routed to subscribers.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::AuthSuccess | Self::Pong)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded inbound frame. Transient: dispatched, never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Conversation id from `data.conversationId`, if any.
    pub topic: Option<String>,
    /// The `data` payload (`Null` when absent).
    pub payload: Value,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        };
        let kind_name = match object.get("type") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(ProtocolError::MissingType),
        };
        let kind =
            FrameKind::parse(&kind_name).ok_or(ProtocolError::UnknownKind(kind_name))?;
        let payload = object.remove("data").unwrap_or(Value::Null);
        let topic = conversation_topic(&payload);
        Ok(Self {
            kind,
            topic,
            payload,
        })
    }

    /// Topic used for routing: the conversation id, else [`GLOBAL_TOPIC`].
    #[must_use]
    pub fn routing_topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(GLOBAL_TOPIC)
    }

    /// Strip transport framing, keeping what subscribers see.
    #[must_use]
    pub fn into_payload(self) -> EventPayload {
        EventPayload {
            kind: self.kind,
            topic: self.topic,
            data: self.payload,
        }
    }
}

fn conversation_topic(payload: &Value) -> Option<String> {
    match payload.get("conversationId")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// The decoded event handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct EventPayload {
    /// Event kind.
    pub kind: FrameKind,
    /// Conversation id, if the event belongs to one.
    pub topic: Option<String>,
    /// Event data.
    pub data: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// A frame the client writes to the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    /// Handshake, sent once per connection right after open.
    Authenticate {
        /// User id being authenticated.
        user_id: String,
    },
    /// Heartbeat ping.
    Ping,
    /// Application event (e.g. a typing indicator from this client).
    Event {
        /// Wire `type`.
        kind: String,
        /// Wire `data`.
        data: Value,
    },
}

impl OutboundFrame {
    /// Build an application event frame.
    #[must_use]
    pub fn event(kind: impl Into<String>, data: Value) -> Self {
        Self::Event {
            kind: kind.into(),
            data,
        }
    }

    /// Wire `type` of this frame.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Ping => "ping",
            Self::Event { kind, .. } => kind,
        }
    }

    /// Serialize to a single-line JSON string.
    #[must_use]
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Authenticate { user_id } => json!({ "type": "authenticate", "userId": user_id }),
            Self::Ping => json!({ "type": "ping" }),
            Self::Event { kind, data } => json!({ "type": kind, "data": data }),
        };
        value.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn kind_names_round_trip() {
        for kind in FrameKind::ALL {
            assert_eq!(FrameKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(FrameKind::parse("presence"), None);
    }

    #[test]
    fn control_kinds() {
        assert!(FrameKind::AuthSuccess.is_control());
        assert!(FrameKind::Pong.is_control());
        assert!(!FrameKind::NewMessage.is_control());
    }

    #[test]
    fn decode_auth_success() {
        let frame = InboundFrame::decode(r#"{"type":"auth_success"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::AuthSuccess);
        assert_eq!(frame.topic, None);
        assert_eq!(frame.payload, Value::Null);
        assert_eq!(frame.routing_topic(), GLOBAL_TOPIC);
    }

    #[test]
    fn decode_message_topic_from_conversation_id() {
        let frame = InboundFrame::decode(
            r#"{"type":"new_message","data":{"conversationId":"c-9","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, FrameKind::NewMessage);
        assert_eq!(frame.routing_topic(), "c-9");
        assert_eq!(frame.payload["text"], "hi");
    }

    #[test]
    fn numeric_conversation_id_is_stringified() {
        let frame =
            InboundFrame::decode(r#"{"type":"typing_indicator","data":{"conversationId":17}}"#)
                .unwrap();
        assert_eq!(frame.routing_topic(), "17");
    }

    #[test]
    fn notification_without_conversation_is_global() {
        let frame =
            InboundFrame::decode(r#"{"type":"notification","data":{"title":"x"}}"#).unwrap();
        assert_eq!(frame.routing_topic(), GLOBAL_TOPIC);
    }

    #[test]
    fn decode_rejects_malformed() {
        assert_matches!(InboundFrame::decode("not json"), Err(ProtocolError::Malformed(_)));
        assert_matches!(InboundFrame::decode("[1,2]"), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_missing_type() {
        assert_matches!(
            InboundFrame::decode(r#"{"data":{}}"#),
            Err(ProtocolError::MissingType)
        );
        assert_matches!(
            InboundFrame::decode(r#"{"type":7}"#),
            Err(ProtocolError::MissingType)
        );
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let err = InboundFrame::decode(r#"{"type":"presence_update"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownKind("presence_update".into()));
    }

    #[test]
    fn encode_authenticate() {
        let frame = OutboundFrame::Authenticate {
            user_id: "u1".into(),
        };
        let value: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value, json!({"type": "authenticate", "userId": "u1"}));
        assert_eq!(frame.kind(), "authenticate");
    }

    #[test]
    fn encode_ping_is_single_line() {
        let text = OutboundFrame::Ping.encode();
        assert_eq!(text, r#"{"type":"ping"}"#);
        assert!(!text.contains('\n'));
    }

    #[test]
    fn encode_event() {
        let frame = OutboundFrame::event("typing_indicator", json!({"conversationId": "c1"}));
        let value: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value["type"], "typing_indicator");
        assert_eq!(value["data"]["conversationId"], "c1");
    }

    #[test]
    fn into_payload_keeps_kind_topic_data() {
        let frame = InboundFrame::decode(
            r#"{"type":"message_reaction","data":{"conversationId":"c2","emoji":"+1"}}"#,
        )
        .unwrap();
        let payload = frame.into_payload();
        assert_eq!(payload.kind, FrameKind::MessageReaction);
        assert_eq!(payload.topic.as_deref(), Some("c2"));
        assert_eq!(payload.data["emoji"], "+1");
    }
}
