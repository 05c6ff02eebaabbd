//! Relay connection management.

use crate::error::{RelayError, RelayResult};
use crate::message::Message;
use crate::protocol::ServerFrame;
use chatly_store::{ChatMessage, MessageId};
use futures_util::{Sink, SinkExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

/// Unique identifier for a connection, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is open and writable
    Open,
    /// A close frame has been queued
    Closing,
    /// Connection is closed or was terminated
    Closed,
}

/// Room and display name bound by a `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub room: String,
    pub username: String,
}

impl Identity {
    pub fn new(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            username: username.into(),
        }
    }
}

/// A room frame held back while the connection's history is being read.
struct HeldFrame {
    id: Option<MessageId>,
    message: Message,
}

/// A live relay connection.
///
/// Outbound frames go through a bounded queue drained by a writer task, so
/// enqueueing never waits on the peer. The identity is bound at most once.
///
/// While a join is reading history, room fanout is held and released right
/// after the history frame, so a joining client never sees a live message
/// ahead of its history.
pub struct Connection {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address
    pub remote_addr: Option<SocketAddr>,
    state: RwLock<ConnectionState>,
    alive: AtomicBool,
    identity: OnceLock<Identity>,
    dropped: AtomicU64,
    held: Mutex<Option<Vec<HeldFrame>>>,
    tx: mpsc::Sender<Message>,
    terminate: watch::Sender<bool>,
}

impl Connection {
    /// Create an open connection whose outbound frames are delivered to `tx`.
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::Sender<Message>,
    ) -> Self {
        let (terminate, _) = watch::channel(false);
        Self {
            id,
            remote_addr,
            state: RwLock::new(ConnectionState::Open),
            alive: AtomicBool::new(true),
            identity: OnceLock::new(),
            dropped: AtomicU64::new(0),
            held: Mutex::new(None),
            tx,
            terminate,
        }
    }

    /// Create a connection together with the receiving end of its queue.
    pub fn channel(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(id, None, tx), rx)
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a message for this connection without waiting.
    ///
    /// A full queue drops the message and counts it.
    pub fn send(&self, message: Message) -> RelayResult<()> {
        if !self.is_open() {
            return Err(RelayError::ConnectionClosed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(self.count_drop()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.set_state(ConnectionState::Closed);
                Err(RelayError::ConnectionClosed)
            }
        }
    }

    /// Serialize and queue a protocol frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> RelayResult<()> {
        self.send(Message::json(frame)?)
    }

    /// Queue a room frame, or hold it while history is pending.
    ///
    /// `id` names the chat message the frame carries, if any, so that a held
    /// copy of a message already present in the history is not sent twice.
    pub fn deliver(&self, message: Message, id: Option<MessageId>) -> RelayResult<()> {
        let mut held = self.held.lock();
        let Some(frames) = held.as_mut() else {
            return self.send(message);
        };
        if !self.is_open() {
            return Err(RelayError::ConnectionClosed);
        }
        if frames.len() >= self.tx.max_capacity() {
            return Err(self.count_drop());
        }
        frames.push(HeldFrame { id, message });
        Ok(())
    }

    /// Start holding room frames until the history frame is queued.
    pub fn hold_room_frames(&self) {
        self.held.lock().get_or_insert_with(Vec::new);
    }

    /// Queue the history frame, then the room frames held since
    /// [`hold_room_frames`](Self::hold_room_frames) that it does not already
    /// contain.
    pub fn replay_history(&self, messages: Vec<ChatMessage>) -> RelayResult<()> {
        let mut held = self.held.lock();
        let frames = held.take().unwrap_or_default();
        let replayed: Vec<MessageId> = messages.iter().map(|m| m.id).collect();

        let result = self.send_frame(&ServerFrame::History { messages });
        for frame in frames {
            if frame.id.is_some_and(|id| replayed.contains(&id)) {
                continue;
            }
            let _ = self.send(frame.message);
        }
        result
    }

    /// Stop holding and queue every held frame as is.
    pub fn release_room_frames(&self) {
        let mut held = self.held.lock();
        for frame in held.take().unwrap_or_default() {
            let _ = self.send(frame.message);
        }
    }

    fn count_drop(&self) -> RelayError {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            connection_id = %self.id,
            dropped,
            "Outbound queue full, dropping frame"
        );
        RelayError::QueueFull(self.id.to_string())
    }

    /// Number of frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record a successful liveness response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection suspect, returning whether it was alive before.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// The bound room and display name, if the connection has joined.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn room(&self) -> Option<&str> {
        self.identity().map(|i| i.room.as_str())
    }

    /// Bind the identity. Fails with the existing identity if already bound.
    pub fn bind(&self, identity: Identity) -> Result<(), &Identity> {
        let mut inserted = false;
        let bound = self.identity.get_or_init(|| {
            inserted = true;
            identity
        });
        if inserted { Ok(()) } else { Err(bound) }
    }

    /// Queue a close frame. Falls back to [`terminate`](Self::terminate) when
    /// the queue cannot take it.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Open {
                return;
            }
            *state = ConnectionState::Closing;
        }
        if self.tx.try_send(Message::close()).is_err() {
            self.terminate();
        }
    }

    /// Drop the connection immediately, without a close handshake.
    pub fn terminate(&self) {
        self.set_state(ConnectionState::Closed);
        self.terminate.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminate.borrow()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        let mut rx = self.terminate.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .field("identity", &self.identity())
            .finish()
    }
}

/// Drains a connection's outbound queue into the socket.
pub(crate) struct ConnectionWriter<S> {
    sink: S,
    rx: mpsc::Receiver<Message>,
    terminate: watch::Receiver<bool>,
}

impl<S> ConnectionWriter<S>
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    pub fn new(sink: S, rx: mpsc::Receiver<Message>, connection: &Connection) -> Self {
        Self {
            sink,
            rx,
            terminate: connection.terminate.subscribe(),
        }
    }

    /// Run the writer loop until a close frame is sent, the queue closes, or
    /// the connection is terminated.
    pub async fn run(mut self) -> RelayResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.terminate.wait_for(|terminated| *terminated) => return Ok(()),
                message = self.rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let is_close = message.is_close();
            if let Err(e) = self.sink.send(message.into()).await {
                tracing::debug!(error = %e, "Failed to send WebSocket message");
                return Err(RelayError::Protocol(e));
            }
            if is_close {
                break;
            }
        }

        let _ = self.sink.close().await;
        Ok(())
    }
}
