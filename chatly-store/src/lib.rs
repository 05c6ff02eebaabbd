//! # Chatly Store
//!
//! Recent-history keeper for chat rooms.
//!
//! Two interchangeable backends implement [`MessageStore`]:
//!
//! - [`RedisStore`]: durable, one Redis list per room, pooled with bb8
//! - [`MemoryStore`]: process-local fallback, never persisted
//!
//! [`connect_store`] picks one at startup and the choice is fixed for the
//! lifetime of the process.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatly_config::StoreSettings;
//! use chatly_store::{NewMessage, connect_store};
//!
//! # async fn example() -> chatly_store::Result<()> {
//! let selected = connect_store(&StoreSettings::default()).await;
//! let saved = selected.store.save(NewMessage::new("General", "alice", "hi")).await?;
//! let history = selected.store.recent_history("General", 50).await?;
//! assert_eq!(history.last(), Some(&saved));
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod message;
mod redis_store;
mod select;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use message::{ChatMessage, MessageId, NewMessage};
pub use redis_store::{RedisPool, RedisStore, RedisStoreConfig, RedisStoreConfigBuilder};
pub use select::{SelectedStore, connect_store};

use async_trait::async_trait;

/// Most messages a single history query returns, whatever the backend.
pub const HISTORY_LIMIT: usize = chatly_config::MAX_HISTORY_LIMIT;

/// Message persistence capability used by the relay.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message, assigning its id and timestamp.
    async fn save(&self, message: NewMessage) -> Result<ChatMessage>;

    /// The newest `limit` messages of `room`, oldest first.
    ///
    /// `limit` is clamped to [`HISTORY_LIMIT`].
    async fn recent_history(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
