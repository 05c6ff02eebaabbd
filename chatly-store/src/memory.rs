//! In-memory fallback store.

use crate::message::{ChatMessage, NewMessage};
use crate::{HISTORY_LIMIT, MessageStore, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only, process-local message log.
///
/// Nothing is evicted and nothing survives a restart; only reads are capped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all rooms.
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut messages = self.messages.write();
        // id is taken under the write lock so ids follow log order
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = message.stamp(id);
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_history(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let limit = limit.min(HISTORY_LIMIT);
        let messages = self.messages.read();
        let mut recent: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.room == room)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn post(store: &MemoryStore, room: &str, username: &str, text: &str) -> ChatMessage {
        let message = NewMessage::new(room, username, text);
        store.save(message).await.unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let first = post(&store, "General", "alice", "one").await;
        let second = post(&store, "General", "bob", "two").await;

        assert!(second.id > first.id);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_filtered_by_room() {
        let store = MemoryStore::new();
        post(&store, "General", "alice", "hi").await;
        post(&store, "Random", "bob", "yo").await;
        post(&store, "General", "carol", "hey").await;

        let history = store.recent_history("General", 50).await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hey"]);

        assert!(store.recent_history("Empty", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_returns_newest_oldest_first() {
        let store = MemoryStore::new();
        for i in 0..120 {
            post(&store, "General", "alice", &format!("m{}", i)).await;
        }

        let history = store.recent_history("General", 50).await.unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history.first().unwrap().text, "m70");
        assert_eq!(history.last().unwrap().text, "m119");

        let short = store.recent_history("General", 3).await.unwrap();
        let texts: Vec<_> = short.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m117", "m118", "m119"]);
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let store = MemoryStore::new();
        for i in 0..60 {
            post(&store, "General", "alice", &i.to_string()).await;
        }

        let capped = store.recent_history("General", 1000).await.unwrap();
        assert_eq!(capped.len(), HISTORY_LIMIT);
        assert!(store.recent_history("General", 0).await.unwrap().is_empty());
        // the log itself is never trimmed
        assert_eq!(store.len(), 60);
    }
}
