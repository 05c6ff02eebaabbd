//! # Chatly
//!
//! A room-based WebSocket chat relay.
//!
//! Clients join a room, receive its recent history and exchange messages that
//! are persisted and fanned out to every room member. Unresponsive peers are
//! evicted by a heartbeat and clients reconnect on their own within a bounded
//! retry budget.
//!
//! The workspace is split by concern:
//!
//! - [`log`]: `tracing` subscriber setup
//! - [`config`]: layered settings
//! - [`store`]: Redis and in-memory message stores
//! - [`relay`]: server, connection registry, fanout, heartbeat and client

pub use chatly_config as config;
pub use chatly_log as log;
pub use chatly_relay as relay;
pub use chatly_store as store;

pub use chatly_config::Settings;
pub use chatly_relay::{ChatHandler, RelayConfig, RelayError, RelayResult, RelayServer};

/// Select the message store and bind a chat relay for `settings`.
pub async fn build_server(settings: &Settings) -> RelayResult<RelayServer<ChatHandler>> {
    let selected = chatly_store::connect_store(&settings.store).await;
    if selected.fell_back {
        tracing::warn!("Messages will not survive a restart");
    }

    let config = RelayConfig::from_settings(settings)?;
    RelayServer::bind_chat(config, selected.store, settings.history.limit).await
}

/// Resolves on Ctrl+C, or on SIGTERM where supported.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
