//! # Chatly Relay
//!
//! Room-based WebSocket chat relay built on tokio-tungstenite.
//!
//! ## Features
//!
//! - Connection registry with room membership derived from each connection's join
//! - Room fanout over bounded per-connection queues
//! - Missed-ping heartbeat eviction
//! - Graceful shutdown
//! - Reconnecting client with a bounded retry budget
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatly_relay::{RelayConfig, RelayServer};
//! use chatly_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> chatly_relay::RelayResult<()> {
//! let config = RelayConfig::builder().bind("127.0.0.1:5000")?.build();
//! let server = RelayServer::bind_chat(config, Arc::new(MemoryStore::new()), 50).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

mod client;
mod connection;
mod error;
mod handler;
mod heartbeat;
mod message;
mod protocol;
mod reconnect;
mod registry;
mod router;
mod server;

pub use client::{WebSocketClient, WebSocketClientBuilder};
pub use connection::{Connection, ConnectionId, ConnectionState, Identity};
pub use error::{RelayError, RelayResult};
pub use handler::{ChatHandler, FrameHandler};
pub use heartbeat::{HeartbeatMonitor, SweepReport};
pub use message::{Message, MessageType};
pub use protocol::{ClientFrame, FrameError, ServerFrame};
pub use reconnect::{
    ChatClient, ChatClientConfig, ClientEvent, ClientStatus, Connector, ReconnectPolicy,
    ReconnectState, SessionState, Transition, UrlConnector,
};
pub use registry::ConnectionRegistry;
pub use router::{Delivery, RoomRouter};
pub use server::{RelayConfig, RelayConfigBuilder, RelayServer};

// Re-export commonly used types from tungstenite
pub use tungstenite::Message as RawMessage;
