// Typed relay settings

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, ConfigLoader, EnvLoader, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on history replayed to a joining connection.
pub const MAX_HISTORY_LIMIT: usize = 50;

/// Environment variable naming an optional settings file.
pub const CONFIG_FILE_VAR: &str = "CHATLY_CONFIG";

/// Complete relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub heartbeat: HeartbeatSettings,
    pub history: HistorySettings,
    pub store: StoreSettings,
}

/// Listener and per-connection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub max_message_size: usize,
    pub outbound_buffer: usize,
    pub handshake_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
            handshake_timeout_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(|e| ConfigError::InvalidValue {
            key: "server.bind_addr".to_string(),
            message: format!("{}", e),
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            limit: MAX_HISTORY_LIMIT,
        }
    }
}

/// Which message store backend to try at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable Redis store, falling back to memory when unreachable
    Redis,
    /// In-memory store only
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "store.backend".to_string(),
                message: format!("unknown backend '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub connect_timeout_secs: u64,
    pub key_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            connect_timeout_secs: 5,
            key_prefix: "chatly".to_string(),
        }
    }
}

impl StoreSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: format!("{}_{}", crate::ENV_PREFIX, key.to_uppercase()),
        message: e.to_string(),
    })
}

impl Settings {
    /// Load settings the way the server binary does.
    ///
    /// Defaults, then the file named by `CHATLY_CONFIG`, then `.env`, then the
    /// process environment. The result is validated.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = std::env::var(CONFIG_FILE_VAR).ok();
        let env = EnvLoader::default().load();
        Self::load_with(file.as_deref().map(Path::new), &env)
    }

    /// Load from an optional file and a pre-collected set of prefixed variables.
    pub fn load_with(file: Option<&Path>, env: &HashMap<String, String>) -> Result<Self> {
        let mut settings = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML or JSON file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let value = ConfigLoader::auto(path)?.load_file(path)?;
        tracing::debug!(path = %path.display(), "loaded settings file");
        serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    /// Override fields from `CHATLY_*` variables (keys already stripped and lowercased).
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        for (key, value) in env {
            match key.as_str() {
                "bind_addr" => self.server.bind_addr = value.trim().to_string(),
                "max_message_size" => self.server.max_message_size = parse_var(key, value)?,
                "outbound_buffer" => self.server.outbound_buffer = parse_var(key, value)?,
                "handshake_timeout_secs" => {
                    self.server.handshake_timeout_secs = parse_var(key, value)?
                }
                "shutdown_grace_secs" => self.server.shutdown_grace_secs = parse_var(key, value)?,
                "heartbeat_interval_secs" => self.heartbeat.interval_secs = parse_var(key, value)?,
                "history_limit" => self.history.limit = parse_var(key, value)?,
                "store_backend" => self.store.backend = value.parse()?,
                "redis_url" => self.store.redis_url = value.trim().to_string(),
                "store_connect_timeout_secs" => {
                    self.store.connect_timeout_secs = parse_var(key, value)?
                }
                "store_key_prefix" => self.store.key_prefix = value.trim().to_string(),
                // logging and file selection variables belong to other layers
                _ => {}
            }
        }
        Ok(())
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.server.bind_addr, "server.bind_addr")?;
        let addr = self.server.socket_addr()?;
        ConfigValidator::is_port(addr.port(), "server.bind_addr")?;
        ConfigValidator::positive(
            self.server.max_message_size as u64,
            "server.max_message_size",
        )?;
        ConfigValidator::positive(
            self.server.outbound_buffer as u64,
            "server.outbound_buffer",
        )?;
        ConfigValidator::positive(
            self.server.handshake_timeout_secs,
            "server.handshake_timeout_secs",
        )?;
        ConfigValidator::positive(self.heartbeat.interval_secs, "heartbeat.interval_secs")?;
        ConfigValidator::in_range(self.history.limit, 1, MAX_HISTORY_LIMIT, "history.limit")?;
        if self.store.backend == StoreBackend::Redis {
            ConfigValidator::is_redis_url(&self.store.redis_url, "store.redis_url")?;
            ConfigValidator::not_empty(&self.store.key_prefix, "store.key_prefix")?;
        }
        Ok(())
    }
}
