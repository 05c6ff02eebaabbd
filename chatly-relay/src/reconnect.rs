//! Reconnecting chat client.
//!
//! [`ReconnectState`] is the pure state machine; [`ChatClient`] drives it
//! against a real transport obtained through a [`Connector`].

use crate::client::WebSocketClient;
use crate::error::{RelayError, RelayResult};
use crate::message::Message;
use crate::protocol::{ClientFrame, ServerFrame};
use async_trait::async_trait;
use chatly_store::ChatMessage;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Client session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A transport attempt is in flight
    Connecting,
    /// Transport is open
    Open,
    /// Waiting for the retry delay before the next attempt
    ClosedRetryPending,
    /// No further attempts will be made
    ClosedFinal,
}

/// Retry ceiling and spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Transport attempts allowed since the last successful open
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// What to do after a transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Start another attempt after the delay
    RetryAfter(Duration),
    /// Give up
    Final,
}

/// Reconnection state machine.
///
/// `attempts` counts transport attempts since the last successful open,
/// including the one in flight. Construction starts the first attempt.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    state: SessionState,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: SessionState::Connecting,
            attempts: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn is_final(&self) -> bool {
        self.state == SessionState::ClosedFinal
    }

    /// Handshake completed. Ignored unless an attempt is in flight.
    pub fn on_open(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.state = SessionState::Open;
        self.attempts = 0;
        true
    }

    /// The transport closed, errored or failed to connect.
    pub fn on_closed(&mut self) -> Transition {
        match self.state {
            SessionState::Connecting | SessionState::Open
                if self.attempts < self.policy.max_attempts =>
            {
                self.state = SessionState::ClosedRetryPending;
                Transition::RetryAfter(self.policy.retry_delay)
            }
            SessionState::ClosedRetryPending => Transition::RetryAfter(self.policy.retry_delay),
            _ => {
                self.state = SessionState::ClosedFinal;
                Transition::Final
            }
        }
    }

    /// The retry delay elapsed. Returns whether a new attempt should start.
    pub fn on_retry_elapsed(&mut self) -> bool {
        if self.state != SessionState::ClosedRetryPending {
            return false;
        }
        self.state = SessionState::Connecting;
        self.attempts += 1;
        true
    }

    /// Manual teardown. Cancels any pending retry.
    pub fn teardown(&mut self) {
        self.state = SessionState::ClosedFinal;
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.state,
            attempts: self.attempts,
        }
    }
}

/// Opens a transport to the relay.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> RelayResult<WebSocketClient>;
}

/// Connects to a fixed `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct UrlConnector {
    url: String,
    timeout: Duration,
}

impl UrlConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self) -> RelayResult<WebSocketClient> {
        WebSocketClient::connect_with_timeout(&self.url, self.timeout).await
    }
}

/// Chat client settings.
#[derive(Debug, Clone, Default)]
pub struct ChatClientConfig {
    pub room: Option<String>,
    pub username: Option<String>,
    pub policy: ReconnectPolicy,
}

impl ChatClientConfig {
    pub fn new(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            username: Some(username.into()),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn identity(&self) -> Option<(&str, &str)> {
        match (&self.room, &self.username) {
            (Some(room), Some(username)) => Some((room, username)),
            _ => None,
        }
    }

    fn join_frame(&self) -> Option<ClientFrame> {
        self.identity().map(|(room, username)| ClientFrame::Join {
            room: room.to_string(),
            username: username.to_string(),
        })
    }
}

/// Something the server told the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    History(Vec<ChatMessage>),
    Message(ChatMessage),
    Error(String),
}

/// Observable client status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatus {
    pub state: SessionState,
    pub attempts: u32,
}

enum Command {
    Text(String),
    Shutdown,
}

/// A chat client that reconnects on its own.
///
/// Only one transport attempt is ever in flight. After the retry ceiling is
/// reached the client stays in [`SessionState::ClosedFinal`].
#[derive(Debug)]
pub struct ChatClient {
    status: watch::Receiver<ClientStatus>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    can_post: bool,
}

impl ChatClient {
    /// Start the client. The first connection attempt begins immediately.
    pub fn spawn<C: Connector>(config: ChatClientConfig, connector: C) -> Self {
        let fsm = ReconnectState::new(config.policy);
        let (status_tx, status) = watch::channel(fsm.status());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let can_post = config.identity().is_some();

        let driver = Driver {
            config,
            connector,
            fsm,
            status: status_tx,
            events: events_tx,
            commands: commands_rx,
        };
        let task = tokio::spawn(driver.run());

        Self {
            status,
            events,
            commands,
            task,
            can_post,
        }
    }

    /// Current status.
    pub fn status(&self) -> ClientStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Post `text` to the configured room.
    pub fn send_text(&self, text: impl Into<String>) -> RelayResult<()> {
        if !self.can_post {
            return Err(RelayError::InvalidState(
                "room and username are not configured".to_string(),
            ));
        }
        if self.status().state != SessionState::Open {
            return Err(RelayError::ConnectionClosed);
        }
        self.commands
            .send(Command::Text(text.into()))
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Next server event, or `None` once the client has stopped for good.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Tear the client down. The state becomes [`SessionState::ClosedFinal`].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Wait for the client to stop and return its final status.
    pub async fn join(self) -> ClientStatus {
        let status = self.status.clone();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Chat client task failed");
        }
        *status.borrow()
    }
}

enum OpenOutcome {
    Closed,
    Shutdown,
}

struct Driver<C> {
    config: ChatClientConfig,
    connector: C,
    fsm: ReconnectState,
    status: watch::Sender<ClientStatus>,
    events: mpsc::UnboundedSender<ClientEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        loop {
            match self.fsm.state() {
                SessionState::Connecting => {
                    let result = tokio::select! {
                        result = self.connector.connect() => result,
                        _ = wait_for_shutdown(&mut self.commands) => {
                            self.fsm.teardown();
                            continue;
                        }
                    };

                    match result {
                        Ok(client) => {
                            self.fsm.on_open();
                            self.publish();
                            tracing::info!("Chat client connected");
                            if let OpenOutcome::Shutdown = self.run_open(client).await {
                                self.fsm.teardown();
                                continue;
                            }
                            tracing::info!("Chat client disconnected");
                        }
                        Err(e) => {
                            tracing::warn!(
                                attempt = self.fsm.attempts(),
                                error = %e,
                                "Connection attempt failed"
                            );
                        }
                    }

                    if let Transition::RetryAfter(delay) = self.fsm.on_closed() {
                        tracing::debug!(delay = ?delay, "Reconnect scheduled");
                    }
                    self.publish();
                }
                SessionState::ClosedRetryPending => {
                    let delay = self.fsm.policy().retry_delay;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            self.fsm.on_retry_elapsed();
                        }
                        _ = wait_for_shutdown(&mut self.commands) => {
                            self.fsm.teardown();
                        }
                    }
                    self.publish();
                }
                SessionState::Open => {
                    // run_open always leaves the open state before returning
                    self.fsm.teardown();
                }
                SessionState::ClosedFinal => break,
            }
        }

        self.publish();
        tracing::info!(attempts = self.fsm.attempts(), "Chat client stopped");
    }

    async fn run_open(&mut self, mut client: WebSocketClient) -> OpenOutcome {
        if let Some(join) = self.config.join_frame() {
            if let Err(e) = client.send_frame(&join) {
                tracing::warn!(error = %e, "Failed to send join");
            }
        }

        loop {
            tokio::select! {
                incoming = client.recv() => match incoming {
                    Some(message) => self.dispatch(message),
                    None => return OpenOutcome::Closed,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Text(text)) => self.post(&client, text),
                    Some(Command::Shutdown) | None => {
                        client.close();
                        return OpenOutcome::Shutdown;
                    }
                },
            }
        }
    }

    fn post(&self, client: &WebSocketClient, text: String) {
        let Some((room, username)) = self.config.identity() else {
            return;
        };
        let frame = ClientFrame::Message {
            room: room.to_string(),
            username: username.to_string(),
            text,
        };
        if let Err(e) = client.send_frame(&frame) {
            tracing::warn!(error = %e, "Failed to send message");
        }
    }

    fn dispatch(&self, message: Message) {
        if !message.is_text() {
            return;
        }
        let event = match message.parse_json::<ServerFrame>() {
            Ok(ServerFrame::History { messages }) => ClientEvent::History(messages),
            Ok(ServerFrame::Message { message }) => ClientEvent::Message(message),
            Ok(ServerFrame::Error { message }) => ClientEvent::Error(message),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable server frame");
                return;
            }
        };
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.status.send_replace(self.fsm.status());
    }
}

/// Resolves on a shutdown command or when every handle is gone. Text queued
/// while no transport is open is discarded.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Shutdown => return,
            Command::Text(_) => tracing::debug!("Dropping message while disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fsm_gives_up_after_max_failed_attempts() {
        let mut fsm = ReconnectState::new(ReconnectPolicy::default());
        let mut attempts_started = 1;

        loop {
            match fsm.on_closed() {
                Transition::RetryAfter(delay) => {
                    assert_eq!(delay, Duration::from_secs(5));
                    assert_eq!(fsm.state(), SessionState::ClosedRetryPending);
                    assert!(fsm.on_retry_elapsed());
                    attempts_started += 1;
                }
                Transition::Final => break,
            }
        }

        assert_eq!(attempts_started, 5);
        assert_eq!(fsm.state(), SessionState::ClosedFinal);
        assert!(!fsm.on_retry_elapsed());
        assert!(!fsm.on_open());
    }

    #[test]
    fn test_fsm_open_resets_counter() {
        let mut fsm = ReconnectState::new(ReconnectPolicy::default());
        fsm.on_closed();
        fsm.on_retry_elapsed();
        assert_eq!(fsm.attempts(), 2);

        assert!(fsm.on_open());
        assert_eq!(fsm.state(), SessionState::Open);
        assert_eq!(fsm.attempts(), 0);

        let retry = Transition::RetryAfter(Duration::from_secs(5));
        assert_eq!(fsm.on_closed(), retry);
        assert!(fsm.on_retry_elapsed());
        assert_eq!(fsm.attempts(), 1);
    }

    #[test]
    fn test_fsm_teardown_is_final() {
        let mut fsm = ReconnectState::new(ReconnectPolicy::default());
        fsm.on_closed();
        fsm.teardown();

        assert!(fsm.is_final());
        assert!(!fsm.on_retry_elapsed());
        assert_eq!(fsm.on_closed(), Transition::Final);
    }

    #[test]
    fn test_fsm_ignores_duplicate_open() {
        let mut fsm = ReconnectState::new(ReconnectPolicy::default());
        assert!(fsm.on_open());
        assert!(!fsm.on_open());
    }

    struct RefusingConnector {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> RelayResult<WebSocketClient> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Connection("refused".to_string()))
        }
    }

    /// Hands the server side of every transport to the test.
    struct ChannelConnector {
        ends: mpsc::UnboundedSender<ServerEnd>,
    }

    struct ServerEnd {
        from_client: mpsc::UnboundedReceiver<Message>,
        to_client: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self) -> RelayResult<WebSocketClient> {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.ends
                .send(ServerEnd {
                    from_client: out_rx,
                    to_client: in_tx,
                })
                .map_err(|_| RelayError::Connection("test ended".to_string()))?;
            Ok(WebSocketClient::from_channels(out_tx, in_rx))
        }
    }

    async fn wait_for_state(client: &ChatClient, state: SessionState) -> ClientStatus {
        let mut status = client.subscribe();
        let current = *status.wait_for(|s| s.state == state).await.unwrap();
        current
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_five_failed_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let client = ChatClient::spawn(
            ChatClientConfig::new("General", "alice"),
            RefusingConnector {
                attempts: Arc::clone(&attempts),
            },
        );

        let status = client.join().await;

        assert_eq!(status.state, SessionState::ClosedFinal);
        assert_eq!(status.attempts, 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_join_and_reconnects_after_close() {
        let (ends_tx, mut ends) = mpsc::unbounded_channel();
        let mut client = ChatClient::spawn(
            ChatClientConfig::new("General", "alice"),
            ChannelConnector { ends: ends_tx },
        );

        let mut server = ends.recv().await.unwrap();
        let join = server.from_client.recv().await.unwrap();
        assert_eq!(
            join.as_text(),
            Some(r#"{"type":"join","room":"General","username":"alice"}"#)
        );
        let status = wait_for_state(&client, SessionState::Open).await;
        assert_eq!(status.attempts, 0);

        server
            .to_client
            .send(Message::text(r#"{"type":"history","messages":[]}"#))
            .unwrap();
        let event = client.next_event().await;
        assert_eq!(event, Some(ClientEvent::History(vec![])));

        client.send_text("hi").unwrap();
        let posted = server.from_client.recv().await.unwrap();
        assert_eq!(
            posted.as_text(),
            Some(r#"{"type":"message","room":"General","username":"alice","text":"hi"}"#)
        );

        // server goes away; the client retries after the delay and joins again
        drop(server);
        let mut server = ends.recv().await.unwrap();
        let rejoin = server.from_client.recv().await.unwrap();
        assert!(rejoin.as_text().unwrap().contains("join"));
        let status = wait_for_state(&client, SessionState::Open).await;
        assert_eq!(status.attempts, 0);

        client.shutdown();
        let status = client.join().await;
        assert_eq!(status.state, SessionState::ClosedFinal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let client = ChatClient::spawn(
            ChatClientConfig::default(),
            RefusingConnector {
                attempts: Arc::clone(&attempts),
            },
        );

        wait_for_state(&client, SessionState::ClosedRetryPending).await;
        assert!(matches!(client.send_text("hi"), Err(RelayError::InvalidState(_))));
        client.shutdown();

        let status = client.join().await;
        assert_eq!(status.state, SessionState::ClosedFinal);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
