// Configuration management for the chatly relay

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    CONFIG_FILE_VAR, HeartbeatSettings, HistorySettings, MAX_HISTORY_LIMIT, ServerSettings,
    Settings, StoreBackend, StoreSettings,
};
pub use validation::{ConfigValidator, Validate};

/// Prefix shared by every chatly environment variable.
pub const ENV_PREFIX: &str = "CHATLY";
