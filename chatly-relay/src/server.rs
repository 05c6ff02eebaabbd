//! Relay server.

use crate::connection::{Connection, ConnectionWriter};
use crate::error::{RelayError, RelayResult};
use crate::handler::{ChatHandler, FrameHandler};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{Message, MessageType};
use crate::registry::ConnectionRegistry;
use chatly_config::Settings;
use chatly_store::{HISTORY_LIMIT, MessageStore};
use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_async_with_config;
use tungstenite::protocol::WebSocketConfig;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Heartbeat interval
    pub heartbeat_interval: Duration,
    /// How long an accepted socket may take to complete the WebSocket upgrade
    pub handshake_timeout: Duration,
    /// How long shutdown waits for sessions to drain
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_message_size: 64 * 1024, // 64KB
            outbound_buffer: 256,
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Create a builder.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Build the relay configuration from loaded settings.
    pub fn from_settings(settings: &Settings) -> RelayResult<Self> {
        Ok(Self {
            bind_addr: settings.server.socket_addr()?,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer.max(1),
            heartbeat_interval: settings.heartbeat.interval(),
            handshake_timeout: settings.server.handshake_timeout(),
            shutdown_grace: settings.server.shutdown_grace(),
        })
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

/// Builder for relay configuration.
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the bind address from a string.
    pub fn bind(mut self, addr: &str) -> RelayResult<Self> {
        self.config.bind_addr = addr
            .parse()
            .map_err(|e| RelayError::Server(format!("Invalid address: {}", e)))?;
        Ok(self)
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the per-connection outbound queue capacity.
    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.config.outbound_buffer = capacity.max(1);
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the WebSocket upgrade deadline.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

/// Relay server.
///
/// Binding happens up front so the local address is known before
/// [`run_until`](Self::run_until) starts accepting.
pub struct RelayServer<H: FrameHandler> {
    config: RelayConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<H>,
}

impl RelayServer<ChatHandler> {
    /// Bind a relay serving room chat backed by `store`.
    pub async fn bind_chat(
        config: RelayConfig,
        store: Arc<dyn MessageStore>,
        history_limit: usize,
    ) -> RelayResult<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let handler = ChatHandler::new(Arc::clone(&registry), store)
            .with_history_limit(history_limit.min(HISTORY_LIMIT));
        Self::bind(config, registry, handler).await
    }
}

impl<H: FrameHandler> RelayServer<H> {
    /// Bind the listening socket.
    pub async fn bind(
        config: RelayConfig,
        registry: Arc<ConnectionRegistry>,
        handler: H,
    ) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            config,
            listener,
            local_addr,
            registry,
            handler: Arc::new(handler),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get a reference to the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Run until the process is killed.
    pub async fn run(self) -> RelayResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `signal` resolves, then shut down gracefully.
    ///
    /// Shutdown stops the heartbeat, stops accepting, sends a close frame to
    /// every connection and waits up to the grace period for sessions to end.
    /// Sessions still running after that are aborted.
    pub async fn run_until<F>(self, signal: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer {
            config,
            listener,
            local_addr,
            registry,
            handler,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = HeartbeatMonitor::new(Arc::clone(&registry), config.heartbeat_interval)
            .spawn(stop_rx.clone());
        let mut sessions = JoinSet::new();

        tracing::info!(addr = %local_addr, "Relay listening");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let session = Session {
                            handler: Arc::clone(&handler),
                            registry: Arc::clone(&registry),
                            config: config.clone(),
                            shutdown: stop_rx.clone(),
                        };
                        sessions.spawn(async move {
                            if let Err(e) = session.run(stream, addr).await {
                                tracing::warn!(addr = %addr, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        tracing::info!("Shutdown: stopping heartbeat");
        stop_tx.send_replace(true);
        if let Err(e) = heartbeat.await {
            tracing::error!(error = %e, "Heartbeat task failed");
        }

        drop(listener);
        tracing::info!(connections = registry.len(), "Shutdown: closing connections");
        for connection in registry.all() {
            connection.close();
        }

        let drain = async { while sessions.join_next().await.is_some() {} };
        if timeout(config.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                remaining = sessions.len(),
                "Shutdown: grace period elapsed, aborting sessions"
            );
            for connection in registry.all() {
                connection.terminate();
            }
            sessions.shutdown().await;
        }

        tracing::info!("Relay stopped");
        Ok(())
    }
}

/// Everything one connection task needs.
struct Session<H> {
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    config: RelayConfig,
    shutdown: watch::Receiver<bool>,
}

impl<H: FrameHandler> Session<H> {
    async fn run(self, stream: TcpStream, addr: SocketAddr) -> RelayResult<()> {
        let handshake = accept_async_with_config(stream, Some(self.config.websocket_config()));
        let ws_stream = match timeout(self.config.handshake_timeout, handshake).await {
            Ok(upgraded) => upgraded?,
            Err(_) => {
                tracing::debug!(addr = %addr, "WebSocket handshake timed out");
                return Err(RelayError::Timeout);
            }
        };
        let connection_id = self.registry.allocate_id();

        tracing::debug!(connection_id = %connection_id, addr = %addr, "Connection accepted");

        let (write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        let connection = Arc::new(Connection::new(connection_id, Some(addr), tx));

        let writer = ConnectionWriter::new(write, rx, &connection);
        let mut writer_handle = tokio::spawn(writer.run());

        self.registry.register(Arc::clone(&connection));
        // registered after the shutdown sweep took its snapshot
        if *self.shutdown.borrow() {
            connection.close();
        }
        self.handler.on_connect(&connection).await;

        loop {
            let next = tokio::select! {
                _ = connection.terminated() => break,
                next = read.next() => next,
            };

            match next {
                Some(Ok(raw)) => {
                    if raw.is_close() {
                        break;
                    }
                    let message = Message::from(raw);
                    match message.message_type {
                        MessageType::Pong => connection.mark_alive(),
                        // answered by tungstenite
                        MessageType::Ping => {}
                        _ => self.handler.on_message(&connection, message).await,
                    }
                }
                Some(Err(e)) => {
                    self.handler
                        .on_error(&connection, &RelayError::Protocol(e))
                        .await;
                    break;
                }
                None => break,
            }
        }

        self.registry.unregister(connection_id);
        connection.close();

        match timeout(self.config.shutdown_grace, &mut writer_handle).await {
            Ok(Ok(Err(e))) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "Writer ended with error"
                );
            }
            Ok(_) => {}
            Err(_) => {
                connection.terminate();
                writer_handle.abort();
            }
        }

        self.handler.on_disconnect(&connection).await;
        tracing::debug!(connection_id = %connection_id, "Connection closed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatly_store::MemoryStore;
    use futures_util::SinkExt;
    use tokio::sync::oneshot;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.outbound_buffer, 256);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = RelayConfig::builder()
            .bind("127.0.0.1:0")
            .unwrap()
            .outbound_buffer(0)
            .heartbeat_interval(Duration::from_secs(1))
            .handshake_timeout(Duration::from_millis(250))
            .shutdown_grace(Duration::from_millis(100))
            .build();

        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));

        assert!(RelayConfig::builder().bind("not an address").is_err());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.server.bind_addr = "127.0.0.1:6000".to_string();
        settings.heartbeat.interval_secs = 10;
        settings.server.handshake_timeout_secs = 3;

        let config = RelayConfig::from_settings(&settings).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let config = RelayConfig::builder().bind("127.0.0.1:0").unwrap().build();
        let server = RelayServer::bind_chat(config, Arc::new(MemoryStore::new()), 50)
            .await
            .unwrap();
        let addr = server.local_addr();
        let registry = Arc::clone(server.registry());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client
            .send(tungstenite::Message::text(
                r#"{"type":"join","room":"General","username":"alice"}"#,
            ))
            .await
            .unwrap();
        // history reply proves the session is registered
        let reply = client.next().await.unwrap().unwrap();
        assert!(reply.is_text());
        assert_eq!(registry.len(), 1);

        stop_tx.send(()).unwrap();

        let mut saw_close = false;
        while let Some(Ok(message)) = client.next().await {
            if message.is_close() {
                saw_close = true;
            }
        }
        assert!(saw_close);

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());
    }
}
