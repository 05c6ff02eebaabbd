//! WebSocket client transport.

use crate::error::{RelayError, RelayResult};
use crate::message::Message;
use crate::protocol::ClientFrame;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use url::Url;

/// Builder for WebSocket client.
#[derive(Debug, Clone)]
pub struct WebSocketClientBuilder {
    url: Option<String>,
    connect_timeout: Duration,
}

impl Default for WebSocketClientBuilder {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl WebSocketClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the WebSocket URL.
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect to the relay.
    pub async fn connect(self) -> RelayResult<WebSocketClient> {
        let url = self
            .url
            .ok_or_else(|| RelayError::InvalidUrl("URL not provided".to_string()))?;

        WebSocketClient::connect_with_timeout(&url, self.connect_timeout).await
    }
}

/// A connected client transport.
///
/// Reading and writing happen on background tasks. [`recv`](Self::recv)
/// returns `None` once the server side is gone.
#[derive(Debug)]
pub struct WebSocketClient {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    closed: bool,
}

impl WebSocketClient {
    /// Create a new client builder.
    pub fn builder() -> WebSocketClientBuilder {
        WebSocketClientBuilder::new()
    }

    /// Connect to a relay.
    pub async fn connect(url: &str) -> RelayResult<Self> {
        Self::connect_with_timeout(url, Duration::from_secs(30)).await
    }

    /// Connect to a relay with a timeout.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> RelayResult<Self> {
        let url = Url::parse(url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidUrl(format!("unsupported scheme '{}'", url.scheme())));
        }

        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| RelayError::Timeout)??;

        let (write, read) = ws_stream.split();
        Ok(Self::spawn_io(write, read))
    }

    fn spawn_io<W, R>(write: W, read: R) -> Self
    where
        W: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static,
        R: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(Self::writer_task(write, outgoing_rx));
        tokio::spawn(Self::reader_task(read, incoming_tx));

        Self::from_channels(outgoing_tx, incoming_rx)
    }

    /// Build a client over existing channels.
    pub(crate) fn from_channels(
        tx: mpsc::UnboundedSender<Message>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            tx,
            rx,
            closed: false,
        }
    }

    async fn writer_task<W>(mut write: W, mut rx: mpsc::UnboundedReceiver<Message>)
    where
        W: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
    {
        while let Some(message) = rx.recv().await {
            let is_close = message.is_close();
            if write.send(message.into()).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }

        let _ = write.close().await;
    }

    async fn reader_task<R>(mut read: R, tx: mpsc::UnboundedSender<Message>)
    where
        R: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        while let Some(result) = read.next().await {
            match result {
                Ok(msg) => {
                    // control frames are answered by tungstenite
                    if msg.is_ping() || msg.is_pong() {
                        continue;
                    }
                    if msg.is_close() {
                        break;
                    }
                    if tx.send(msg.into()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Client transport error");
                    break;
                }
            }
        }
    }

    /// Send a message to the server.
    pub fn send(&self, message: Message) -> RelayResult<()> {
        if self.closed {
            return Err(RelayError::ConnectionClosed);
        }
        self.tx
            .send(message)
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Send a text message.
    pub fn send_text<S: Into<String>>(&self, text: S) -> RelayResult<()> {
        self.send(Message::text(text))
    }

    /// Send a protocol frame.
    pub fn send_frame(&self, frame: &ClientFrame) -> RelayResult<()> {
        self.send(Message::json(frame)?)
    }

    /// Receive the next message from the server.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Close the connection.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(Message::close());
        }
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_urls() {
        let err = WebSocketClient::connect("not a url").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl(_)));

        let http = "http://localhost:5000";
        let err = WebSocketClient::connect(http).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl(_)));

        let err = WebSocketClient::builder().connect().await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_send_frame_and_close() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let mut client = WebSocketClient::from_channels(out_tx, in_rx);

        client
            .send_frame(&ClientFrame::Join {
                room: "General".to_string(),
                username: "alice".to_string(),
            })
            .unwrap();
        let sent = out_rx.recv().await.unwrap();
        assert_eq!(
            sent.as_text(),
            Some(r#"{"type":"join","room":"General","username":"alice"}"#)
        );

        client.close();
        assert!(client.is_closed());
        assert!(out_rx.recv().await.unwrap().is_close());
        assert!(matches!(client.send_text("late"), Err(RelayError::ConnectionClosed)));
    }
}
