//! Session event handling.

use crate::connection::{Connection, Identity};
use crate::error::RelayError;
use crate::message::{Message, MessageType};
use crate::protocol::{ClientFrame, FrameError, ServerFrame};
use crate::registry::ConnectionRegistry;
use crate::router::RoomRouter;
use async_trait::async_trait;
use chatly_store::{HISTORY_LIMIT, MessageStore, NewMessage};
use std::sync::Arc;

/// Trait for handling relay connection events.
///
/// The server calls these from the connection's own task, one event at a time.
/// Ping, pong and close frames are consumed by the server and never reach
/// [`on_message`](Self::on_message).
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Called after the connection is registered.
    async fn on_connect(&self, connection: &Arc<Connection>) {
        let _ = connection;
    }

    /// Called for every text or binary frame.
    async fn on_message(&self, connection: &Arc<Connection>, message: Message);

    /// Called after the connection has been unregistered.
    async fn on_disconnect(&self, connection: &Arc<Connection>) {
        let _ = connection;
    }

    /// Called when the transport fails. The session ends afterwards.
    async fn on_error(&self, connection: &Arc<Connection>, error: &RelayError) {
        tracing::warn!(connection_id = %connection.id, error = %error, "Transport error");
    }
}

/// Room chat semantics: `join` replays history, `message` persists and fans out.
pub struct ChatHandler {
    router: RoomRouter,
    store: Arc<dyn MessageStore>,
    history_limit: usize,
}

impl ChatHandler {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            router: RoomRouter::new(registry),
            store,
            history_limit: HISTORY_LIMIT,
        }
    }

    /// Number of messages replayed on join, clamped to `1..=HISTORY_LIMIT`.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.clamp(1, HISTORY_LIMIT);
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    /// Handle one text frame. Errors are meant for the sender.
    pub async fn handle_text(
        &self,
        connection: &Arc<Connection>,
        text: &str,
    ) -> Result<(), FrameError> {
        match ClientFrame::parse(text)? {
            ClientFrame::Join { room, username } => self.join(connection, room, username).await,
            ClientFrame::Message {
                room,
                username,
                text,
            } => self.post(connection, NewMessage::new(room, username, text)).await,
        }
    }

    /// Bind the identity and reply with the room's recent history.
    ///
    /// Room frames broadcast while the history is read are held and queued
    /// right after it, minus any message the history already contains.
    async fn join(
        &self,
        connection: &Arc<Connection>,
        room: String,
        username: String,
    ) -> Result<(), FrameError> {
        let identity = Identity::new(room, username);
        connection.hold_room_frames();
        match connection.bind(identity.clone()) {
            Ok(()) => {
                tracing::info!(
                    connection_id = %connection.id,
                    room = %identity.room,
                    username = %identity.username,
                    "Joined room"
                );
            }
            Err(existing) if *existing == identity => {
                tracing::debug!(
                    connection_id = %connection.id,
                    room = %identity.room,
                    "Repeated join"
                );
            }
            Err(existing) => {
                connection.release_room_frames();
                return Err(FrameError::AlreadyJoined {
                    room: existing.room.clone(),
                    username: existing.username.clone(),
                });
            }
        }

        let limit = self.history_limit;
        let messages = match self.store.recent_history(&identity.room, limit).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(
                    connection_id = %connection.id,
                    room = %identity.room,
                    backend = self.store.backend(),
                    error = %e,
                    "Failed to load history"
                );
                connection.release_room_frames();
                return Err(FrameError::History);
            }
        };

        if let Err(e) = connection.replay_history(messages) {
            tracing::debug!(connection_id = %connection.id, error = %e, "Failed to queue history");
        }
        Ok(())
    }

    async fn post(
        &self,
        connection: &Arc<Connection>,
        message: NewMessage,
    ) -> Result<(), FrameError> {
        let stored = self.store.save(message).await.map_err(|e| {
            tracing::error!(
                connection_id = %connection.id,
                backend = self.store.backend(),
                error = %e,
                "Failed to save message"
            );
            FrameError::Store
        })?;

        let room = stored.room.clone();
        let frame = ServerFrame::Message { message: stored };
        match self.router.broadcast(&room, &frame, None) {
            Ok(delivery) => {
                tracing::debug!(
                    connection_id = %connection.id,
                    room = %room,
                    delivered = delivery.delivered,
                    skipped = delivery.skipped,
                    "Broadcast message"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(room = %room, error = %e, "Failed to broadcast message");
                Err(FrameError::Store)
            }
        }
    }
}

#[async_trait]
impl FrameHandler for ChatHandler {
    async fn on_message(&self, connection: &Arc<Connection>, message: Message) {
        let result = match message.message_type {
            MessageType::Text => match message.as_text() {
                Some(text) => self.handle_text(connection, text).await,
                None => Err(FrameError::Malformed("invalid UTF-8".to_string())),
            },
            MessageType::Binary => Err(FrameError::Unsupported),
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %connection.id, error = %e, "Rejected frame");
            reply(connection, &ServerFrame::from(e));
        }
    }

    async fn on_disconnect(&self, connection: &Arc<Connection>) {
        tracing::debug!(
            connection_id = %connection.id,
            room = connection.room().unwrap_or("-"),
            dropped_frames = connection.dropped_frames(),
            "Left"
        );
    }
}

impl std::fmt::Debug for ChatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandler")
            .field("backend", &self.store.backend())
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

fn reply(connection: &Connection, frame: &ServerFrame) {
    if let Err(e) = connection.send_frame(frame) {
        tracing::debug!(connection_id = %connection.id, error = %e, "Failed to queue reply");
    }
}
