//! Error types for relay operations.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer's outbound queue is full and the frame was dropped
    #[error("Outbound queue full for connection {0}")]
    QueueFull(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] chatly_config::ConfigError),

    /// Operation attempted in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
