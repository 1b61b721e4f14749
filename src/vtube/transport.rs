//! Transport layer: trait-based abstraction over the duplex connection to
//! VTube Studio.
//!
//! The production implementation is a WebSocket (`tokio-tungstenite`); tests
//! plug in scripted transports through the same traits.

use super::error::AvatarLinkError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

// ── Transport Traits ────────────────────────────────────

/// A message-oriented duplex connection carrying JSON values.
#[async_trait]
pub trait AvatarTransport: Send + Sync {
    /// Send one message. Fails fast with `NotConnected` once the connection
    /// has been closed; nothing is queued.
    async fn send(&self, message: Value) -> Result<(), AvatarLinkError>;

    /// Wait for the next inbound message.
    async fn recv(&self) -> Result<Value, AvatarLinkError>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint_uri: &str) -> Result<Arc<dyn AvatarTransport>, AvatarLinkError>;
}

// ── WebSocket Transport ─────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    open: AtomicBool,
}

impl WebSocketTransport {
    pub fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AvatarTransport for WebSocketTransport {
    async fn send(&self, message: Value) -> Result<(), AvatarLinkError> {
        if !self.is_open() {
            return Err(AvatarLinkError::NotConnected);
        }
        let text = serde_json::to_string(&message)?;
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(text)).await {
            self.mark_closed();
            return Err(AvatarLinkError::Transport(format!("send failed: {}", e)));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Value, AvatarLinkError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).map_err(|e| {
                        AvatarLinkError::Protocol(format!(
                            "unparseable frame: {} ({})",
                            e,
                            text.chars().take(200).collect::<String>()
                        ))
                    });
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return serde_json::from_slice(&bytes).map_err(|e| {
                        AvatarLinkError::Protocol(format!("unparseable binary frame: {}", e))
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "VTube Studio closed the connection");
                    self.mark_closed();
                    return Err(AvatarLinkError::Transport("connection closed".to_string()));
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(AvatarLinkError::Transport(format!("read failed: {}", e)));
                }
                None => {
                    self.mark_closed();
                    return Err(AvatarLinkError::Transport("connection closed".to_string()));
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "WebSocket close error");
        }
    }
}

/// Connects with `tokio_tungstenite::connect_async`, bounded by a timeout so
/// a half-open port does not stall the reconnect loop.
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint_uri: &str) -> Result<Arc<dyn AvatarTransport>, AvatarLinkError> {
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint_uri))
            .await
            .map_err(|_| {
                warn!(endpoint = endpoint_uri, "WebSocket connection timed out");
                AvatarLinkError::Transport(format!("connection to {} timed out", endpoint_uri))
            })??;
        Ok(Arc::new(WebSocketTransport::new(ws)))
    }
}
