//! Chat wire protocol.
//!
//! Every frame is a JSON object with a `type` discriminator.
//!
//! | direction | type | fields |
//! |---|---|---|
//! | client → server | `join` | `room`, `username` |
//! | client → server | `message` | `room`, `username`, `text` |
//! | server → client | `history` | `messages` |
//! | server → client | `message` | `message` |
//! | server → client | `error` | `message` |

use chatly_store::{ChatMessage, MessageId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Bind the connection to a room and request its history.
    Join { room: String, username: String },
    /// Post a message to a room.
    Message {
        room: String,
        username: String,
        text: String,
    },
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Recent messages of the joined room, oldest first.
    History { messages: Vec<ChatMessage> },
    /// A stored message broadcast to room members.
    Message { message: ChatMessage },
    /// Human readable failure description.
    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// Id of the chat message carried by a `message` frame.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            ServerFrame::Message { message } => Some(message.id),
            _ => None,
        }
    }
}

/// Why an inbound frame could not be handled.
///
/// The `Display` text is what the client receives in the `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{0}' must be a non-empty string")]
    InvalidField(&'static str),

    #[error("Unknown frame type '{0}'")]
    UnknownType(String),

    #[error("Binary frames are not supported")]
    Unsupported,

    #[error("Connection already joined room '{room}' as '{username}'")]
    AlreadyJoined { room: String, username: String },

    #[error("Failed to load history")]
    History,

    #[error("Failed to process message")]
    Store,
}

impl From<FrameError> for ServerFrame {
    fn from(err: FrameError) -> Self {
        ServerFrame::error(err.to_string())
    }
}

impl ClientFrame {
    /// Parse and validate a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| FrameError::Malformed("expected a JSON object".to_string()))?;

        let frame_type = match object.get("type") {
            None | Some(Value::Null) => return Err(FrameError::MissingField("type")),
            Some(Value::String(t)) => t.as_str(),
            Some(_) => return Err(FrameError::InvalidField("type")),
        };

        match frame_type {
            "join" => Ok(ClientFrame::Join {
                room: required(object, "room", true)?,
                username: required(object, "username", true)?,
            }),
            "message" => Ok(ClientFrame::Message {
                room: required(object, "room", true)?,
                username: required(object, "username", true)?,
                text: required(object, "text", false)?,
            }),
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }

    pub fn room(&self) -> &str {
        match self {
            ClientFrame::Join { room, .. } | ClientFrame::Message { room, .. } => room,
        }
    }
}

fn required(
    object: &Map<String, Value>,
    field: &'static str,
    reject_blank: bool,
) -> Result<String, FrameError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(FrameError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(FrameError::InvalidField(field)),
        Some(Value::String(s)) if reject_blank && s.trim().is_empty() => {
            Err(FrameError::InvalidField(field))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FrameError::InvalidField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        let frame = ClientFrame::parse(r#"{"type":"join","room":"General","username":"alice"}"#);
        assert_eq!(
            frame,
            Ok(ClientFrame::Join {
                room: "General".to_string(),
                username: "alice".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_message_ignores_extra_fields() {
        let frame = ClientFrame::parse(
            r#"{"type":"message","room":"General","username":"alice","text":"hi","timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(frame.room(), "General");
        assert!(matches!(frame, ClientFrame::Message { ref text, .. } if text == "hi"));
    }

    #[test]
    fn test_join_without_room_is_rejected() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"join","username":"alice"}"#),
            Err(FrameError::MissingField("room"))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"join","room":"  ","username":"alice"}"#),
            Err(FrameError::InvalidField("room"))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"join","room":null,"username":"alice"}"#),
            Err(FrameError::MissingField("room"))
        );
    }

    #[test]
    fn test_message_requires_text() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"message","room":"General","username":"alice"}"#),
            Err(FrameError::MissingField("text"))
        );
        assert_eq!(
            ClientFrame::parse(
                r#"{"type":"message","room":"General","username":"alice","text":""}"#
            ),
            Err(FrameError::InvalidField("text"))
        );
        // whitespace is a legitimate message body
        assert!(
            ClientFrame::parse(
                r#"{"type":"message","room":"General","username":"alice","text":" "}"#
            )
            .is_ok()
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(ClientFrame::parse("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(ClientFrame::parse("[1,2]"), Err(FrameError::Malformed(_))));
        assert_eq!(
            ClientFrame::parse(r#"{"room":"General"}"#),
            Err(FrameError::MissingField("type"))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":42}"#),
            Err(FrameError::InvalidField("type"))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"leave","room":"General"}"#),
            Err(FrameError::UnknownType("leave".to_string()))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"join","room":7,"username":"alice"}"#),
            Err(FrameError::InvalidField("room"))
        );
    }

    #[test]
    fn test_client_frame_serializes_with_tag() {
        let value = serde_json::to_value(ClientFrame::Join {
            room: "General".to_string(),
            username: "alice".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "join", "room": "General", "username": "alice"})
        );
    }

    #[test]
    fn test_server_frames_round_trip_through_json() {
        let message: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": 1,
            "room": "General",
            "username": "alice",
            "text": "hi",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let json = serde_json::to_value(ServerFrame::Message {
            message: message.clone(),
        })
        .unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["message"]["username"], "alice");

        let error = serde_json::to_value(ServerFrame::from(FrameError::Store)).unwrap();
        assert_eq!(
            error,
            serde_json::json!({"type": "error", "message": "Failed to process message"})
        );

        let history: ServerFrame = serde_json::from_value(serde_json::json!({
            "type": "history",
            "messages": [json["message"].clone()]
        }))
        .unwrap();
        let messages = vec![message];
        assert_eq!(history, ServerFrame::History { messages });
    }
}
