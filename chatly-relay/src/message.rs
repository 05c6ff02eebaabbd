//! Transport-level WebSocket messages.
//!
//! [`Message`] is what travels through a connection's outbound queue. The
//! payload is a [`Bytes`] buffer so one serialized broadcast frame can be
//! cloned to every room member without copying.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Text message
    Text,
    /// Binary message
    Binary,
    /// Liveness ping
    Ping,
    /// Liveness ping response
    Pong,
    /// Close message
    Close,
}

/// A WebSocket message.
#[derive(Debug, Clone)]
pub struct Message {
    /// The message type
    pub message_type: MessageType,
    /// The message payload
    pub payload: Bytes,
}

impl Message {
    fn new(message_type: MessageType, payload: Bytes) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Create a new text message.
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::new(MessageType::Text, Bytes::from(text.into()))
    }

    /// Create a new binary message.
    pub fn binary<B: Into<Bytes>>(data: B) -> Self {
        Self::new(MessageType::Binary, data.into())
    }

    /// Create a new ping message.
    pub fn ping<B: Into<Bytes>>(data: B) -> Self {
        Self::new(MessageType::Ping, data.into())
    }

    /// Create a new pong message.
    pub fn pong<B: Into<Bytes>>(data: B) -> Self {
        Self::new(MessageType::Pong, data.into())
    }

    /// Create a close message.
    pub fn close() -> Self {
        Self::new(MessageType::Close, Bytes::new())
    }

    /// Create a JSON text message from a serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::text(serde_json::to_string(value)?))
    }

    /// Parse the message payload as JSON.
    pub fn parse_json<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Get the payload of a text message as a string.
    pub fn as_text(&self) -> Option<&str> {
        if self.message_type == MessageType::Text {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    /// Get the message payload as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_text(&self) -> bool {
        self.message_type == MessageType::Text
    }

    pub fn is_ping(&self) -> bool {
        self.message_type == MessageType::Ping
    }

    pub fn is_pong(&self) -> bool {
        self.message_type == MessageType::Pong
    }

    pub fn is_close(&self) -> bool {
        self.message_type == MessageType::Close
    }
}

impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(text) => Self::text(text.as_str()),
            tungstenite::Message::Binary(data) => Self::binary(data),
            tungstenite::Message::Ping(data) => Self::ping(data),
            tungstenite::Message::Pong(data) => Self::pong(data),
            tungstenite::Message::Close(_) => Self::close(),
            // raw frames only surface when reading with a custom config
            tungstenite::Message::Frame(_) => Self::binary(Bytes::new()),
        }
    }
}

impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg.message_type {
            MessageType::Text => tungstenite::Message::Text(
                String::from_utf8_lossy(&msg.payload).into_owned().into(),
            ),
            MessageType::Binary => tungstenite::Message::Binary(msg.payload),
            MessageType::Ping => tungstenite::Message::Ping(msg.payload),
            MessageType::Pong => tungstenite::Message::Pong(msg.payload),
            MessageType::Close => tungstenite::Message::Close(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_message_is_text() {
        let message = Message::json(&serde_json::json!({"type": "join"})).unwrap();
        assert!(message.is_text());
        assert_eq!(message.as_text(), Some(r#"{"type":"join"}"#));

        let value: serde_json::Value = message.parse_json().unwrap();
        assert_eq!(value["type"], "join");
    }

    #[test]
    fn test_binary_has_no_text_view() {
        let message = Message::binary(vec![0xff, 0x00]);
        assert_eq!(message.as_text(), None);
        assert_eq!(message.as_bytes(), &[0xff, 0x00]);
    }

    #[test]
    fn test_tungstenite_conversion() {
        let raw: tungstenite::Message = Message::ping(Bytes::from_static(b"p")).into();
        assert!(raw.is_ping());

        let back: Message = tungstenite::Message::Pong(Bytes::from_static(b"p")).into();
        assert!(back.is_pong());
        assert_eq!(back.as_bytes(), b"p");

        let close: Message = tungstenite::Message::Close(None).into();
        assert!(close.is_close());
    }
}
