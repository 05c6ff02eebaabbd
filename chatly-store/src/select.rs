//! One-time backend selection at startup.

use crate::MessageStore;
use crate::memory::MemoryStore;
use crate::redis_store::{RedisStore, RedisStoreConfig};
use chatly_config::{StoreBackend, StoreSettings};
use std::sync::Arc;
use tracing::{info, warn};

/// The store chosen for the lifetime of the process.
#[derive(Clone)]
pub struct SelectedStore {
    /// The active backend
    pub store: Arc<dyn MessageStore>,
    /// Backend actually in use
    pub backend: StoreBackend,
    /// Whether the durable backend was requested but unreachable
    pub fell_back: bool,
}

impl std::fmt::Debug for SelectedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedStore")
            .field("backend", &self.backend)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

impl SelectedStore {
    fn memory(fell_back: bool) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            backend: StoreBackend::Memory,
            fell_back,
        }
    }
}

/// Pick the message store once.
///
/// A durable backend that cannot be reached is not fatal: the in-memory store
/// is used instead and the durable backend is never retried.
pub async fn connect_store(settings: &StoreSettings) -> SelectedStore {
    let selected = match settings.backend {
        StoreBackend::Memory => SelectedStore::memory(false),
        StoreBackend::Redis => {
            let config = RedisStoreConfig::from_settings(settings);
            match RedisStore::connect(config).await {
                Ok(store) => SelectedStore {
                    store: Arc::new(store),
                    backend: StoreBackend::Redis,
                    fell_back: false,
                },
                Err(e) => {
                    warn!(
                        url = %settings.redis_url,
                        error = %e,
                        "Redis connection failed, using in-memory storage"
                    );
                    SelectedStore::memory(true)
                }
            }
        }
    };

    info!(backend = selected.store.backend(), "message store ready");
    selected
}
