//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned message identifier.
pub type MessageId = u64;

/// A message as persisted and broadcast by the relay.
///
/// `id` and `timestamp` are assigned by the store when the message is saved,
/// never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique, store-assigned identifier
    pub id: MessageId,
    /// Room the message was posted to
    pub room: String,
    /// Author display name
    pub username: String,
    /// Message body
    pub text: String,
    /// Server receipt time
    pub timestamp: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room: String,
    pub username: String,
    pub text: String,
}

impl NewMessage {
    pub fn new(
        room: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            room: room.into(),
            username: username.into(),
            text: text.into(),
        }
    }

    /// Stamp the message with an id and the current time.
    pub(crate) fn stamp(self, id: MessageId) -> ChatMessage {
        ChatMessage {
            id,
            room: self.room,
            username: self.username,
            text: self.text,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let message = NewMessage::new("General", "alice", "hi").stamp(7);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["room"], "General");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["text"], "hi");
        assert!(value["timestamp"].as_str().is_some());
    }
}
