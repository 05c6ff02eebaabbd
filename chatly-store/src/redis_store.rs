//! Redis-backed durable store.

use crate::message::{ChatMessage, NewMessage};
use crate::{HISTORY_LIMIT, MessageStore, Result, StoreError};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use chatly_config::StoreSettings;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Type alias for the connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Budget for the startup connection check and for pool checkouts.
    pub connection_timeout: Duration,
    /// Namespace for every key the store writes.
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            key_prefix: "chatly".to_string(),
        }
    }
}

impl RedisStoreConfig {
    pub fn builder() -> RedisStoreConfigBuilder {
        RedisStoreConfigBuilder::default()
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self::builder()
            .url(settings.redis_url.clone())
            .connection_timeout(settings.connect_timeout())
            .key_prefix(settings.key_prefix.clone())
            .build()
    }
}

/// Builder for Redis store configuration.
#[derive(Default)]
pub struct RedisStoreConfigBuilder {
    config: RedisStoreConfig,
}

impl RedisStoreConfigBuilder {
    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisStoreConfig {
        self.config
    }
}

/// Durable store keeping one Redis list per room.
///
/// Layout: `{prefix}:message:next_id` is the id sequence and
/// `{prefix}:room:{room}:messages` holds JSON-encoded messages in arrival order.
pub struct RedisStore {
    pool: RedisPool,
    key_prefix: String,
}

impl RedisStore {
    /// Connect and verify the server answers `PING` within the configured timeout.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self> {
        let budget = config.connection_timeout;
        let pool = timeout(budget, Self::build_pool(&config)).await??;
        Ok(Self::from_pool(pool, config.key_prefix))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: RedisPool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    async fn build_pool(config: &RedisStoreConfig) -> Result<RedisPool> {
        let manager = RedisConnectionManager::new(config.url.clone())
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // Scope the checkout so the connection returns to the pool
        {
            let mut conn = pool.get().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }

        info!(pool_size = config.pool_size, url = %config.url, "Redis message store connected");
        Ok(pool)
    }

    fn id_key(&self) -> String {
        format!("{}:message:next_id", self.key_prefix)
    }

    fn room_key(&self, room: &str) -> String {
        format!("{}:room:{}:messages", self.key_prefix, room)
    }
}

#[async_trait]
impl MessageStore for RedisStore {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut conn = self.pool.get().await?;

        let id: u64 = redis::cmd("INCR")
            .arg(self.id_key())
            .query_async(&mut *conn)
            .await?;
        let stored = message.stamp(id);
        let encoded = serde_json::to_string(&stored)?;

        let _: i64 = redis::cmd("RPUSH")
            .arg(self.room_key(&stored.room))
            .arg(encoded)
            .query_async(&mut *conn)
            .await?;

        debug!(id, room = %stored.room, "message saved to redis");
        Ok(stored)
    }

    async fn recent_history(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let limit = limit.min(HISTORY_LIMIT);
        if limit == 0 {
            // LRANGE key -0 -1 would return the whole list
            return Ok(Vec::new());
        }

        let mut conn = self.pool.get().await?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.room_key(room))
            .arg(-(limit as i64))
            .arg(-1)
            .query_async(&mut *conn)
            .await?;

        raw.iter()
            .map(|entry| serde_json::from_str(entry).map_err(StoreError::from))
            .collect()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::Utc;

    fn authored(messages: &[ChatMessage]) -> Vec<(&str, &str, &str)> {
        messages
            .iter()
            .map(|m| (m.room.as_str(), m.username.as_str(), m.text.as_str()))
            .collect()
    }

    #[test]
    fn test_config_from_settings() {
        let settings = StoreSettings {
            redis_url: "redis://cache:6380".to_string(),
            connect_timeout_secs: 2,
            key_prefix: "test".to_string(),
            ..StoreSettings::default()
        };

        let config = RedisStoreConfig::from_settings(&settings);
        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.connection_timeout, Duration::from_secs(2));
        assert_eq!(config.key_prefix, "test");
        assert_eq!(config.pool_size, 10);
    }

    #[tokio::test]
    async fn test_connect_fails_when_unreachable() {
        let config = RedisStoreConfig::builder()
            .url("redis://127.0.0.1:1")
            .connection_timeout(Duration::from_millis(500))
            .build();

        let err = RedisStore::connect(config).await.err().unwrap();
        assert!(err.is_connection_error() || matches!(err, StoreError::Redis(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = RedisStoreConfig::builder().url("not a url").build();
        let err = RedisStore::connect(config).await.err().unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_key_layout() {
        let manager = RedisConnectionManager::new("redis://127.0.0.1:1").unwrap();
        let pool = Pool::builder().build_unchecked(manager);
        let store = RedisStore::from_pool(pool, "chatly");

        assert_eq!(store.id_key(), "chatly:message:next_id");
        assert_eq!(store.room_key("General"), "chatly:room:General:messages");
    }

    #[tokio::test]
    async fn test_zero_limit_skips_backend() {
        let manager = RedisConnectionManager::new("redis://127.0.0.1:1").unwrap();
        let pool = Pool::builder().build_unchecked(manager);
        let store = RedisStore::from_pool(pool, "chatly");

        assert!(store.recent_history("General", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_history_round_trip_matches_memory_store() {
        let prefix = format!("chatly-test-{}", Utc::now().timestamp_micros());
        let config = RedisStoreConfig::builder()
            .url("redis://localhost:6379")
            .key_prefix(prefix)
            .build();
        let durable = RedisStore::connect(config).await.unwrap();
        let memory = MemoryStore::new();

        for i in 0..60 {
            let message = NewMessage::new("General", format!("user{}", i % 3), format!("m{}", i));
            durable.save(message.clone()).await.unwrap();
            memory.save(message).await.unwrap();
        }
        let elsewhere = NewMessage::new("Random", "bob", "elsewhere");
        durable.save(elsewhere).await.unwrap();

        let history = durable.recent_history("General", 100).await.unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.first().unwrap().text, "m10");
        assert_eq!(history.last().unwrap().text, "m59");
        assert!(history.windows(2).all(|pair| pair[0].id < pair[1].id));

        let expected = memory.recent_history("General", 100).await.unwrap();
        assert_eq!(authored(&history), authored(&expected));

        let mut conn = durable.pool.get().await.unwrap();
        let _: i64 = redis::cmd("DEL")
            .arg(durable.id_key())
            .arg(durable.room_key("General"))
            .arg(durable.room_key("Random"))
            .query_async(&mut *conn)
            .await
            .unwrap();
    }
}
