//! Chatly logging setup.
//!
//! Every chatly crate emits structured events through the `tracing` macros.
//! This crate turns the `CHATLY_*` environment variables into a
//! `tracing-subscriber` pipeline and installs it once per process.
//!
//! # Usage
//!
//! ```rust,no_run
//! chatly_log::init();
//! tracing::info!(port = 5000, "relay starting");
//! ```
//!
//! # Environment Variables
//!
//! - `CHATLY_DEBUG=1` - Enable debug logging
//! - `CHATLY_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `CHATLY_LOG_FORMAT=pretty|compact|json` - Set output format
//! - `CHATLY_LOG_COLOR=1|0` - Enable/disable colors
//!
//! `RUST_LOG`, when set, takes precedence over `CHATLY_LOG_LEVEL`.

use once_cell::sync::OnceCell;
use std::env;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of events that reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Pretty,
            color: false,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("CHATLY_DEBUG").unwrap_or(false);

        let level = lookup("CHATLY_LOG_LEVEL")
            .and_then(|s| Level::from_str(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("CHATLY_LOG_FORMAT")
            .and_then(|s| Format::from_str(&s))
            .unwrap_or(Format::Pretty);

        // NO_COLOR wins over terminal detection, CHATLY_LOG_COLOR over both
        let color = flag("CHATLY_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            level,
            format,
            color: color && format != Format::Json,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

// ============================================================================
// Public API
// ============================================================================

static INSTALLED: OnceCell<LogConfig> = OnceCell::new();

/// Install the global subscriber using [`LogConfig::from_env`].
///
/// Returns `false` when a subscriber was already installed.
pub fn init() -> bool {
    init_with(LogConfig::from_env())
}

/// Install the global subscriber with an explicit configuration.
pub fn init_with(config: LogConfig) -> bool {
    let mut installed = false;
    INSTALLED.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(config.filter());
        let result = match config.format {
            Format::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(config.color))
                .try_init(),
            Format::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact().with_ansi(config.color))
                .try_init(),
            Format::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
                .try_init(),
        };
        installed = result.is_ok();
        config
    });
    installed
}

/// The configuration that was installed, if any.
pub fn config() -> Option<&'static LogConfig> {
    INSTALLED.get()
}
