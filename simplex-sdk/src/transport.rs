//! Websocket transport to the chat daemon.
//!
//! One [`Connection`] per daemon port, owned by a [`ConnectionManager`].
//! A connection runs two background tasks: a writer draining an outbound
//! channel into the socket, and a reader routing reply frames to the
//! command that is waiting for them.
//!
//! Commands on one connection are strictly serialized. Each command
//! registers a single-use completion handle under its correlation id before
//! the request is written, so a reply always reaches the caller that issued
//! it. Frames without a correlation id are unsolicited events and are
//! dropped; frames naming no waiting command are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Result, SdkError};
use crate::protocol::{self, ChatResponse};

/// Default time to wait for a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Something that can run a daemon command and return its decoded reply.
///
/// Implemented by [`Connection`]; tests substitute recording fakes.
pub trait CommandTransport: Send + Sync {
    fn send<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<ChatResponse>>;
}

/// Settings shared by every connection a manager opens.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Host the daemon listens on.
    pub host: String,
    /// How long a command waits for its reply.
    pub response_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Opens and keeps one connection per port.
pub struct ConnectionManager {
    config: TransportConfig,
    connections: tokio::sync::Mutex<HashMap<u16, Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            connections: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Return the connection for `port`, opening it on first use.
    ///
    /// Concurrent first calls for the same port open a single socket.
    pub async fn connect(&self, port: u16) -> Result<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&port) {
            return Ok(existing.clone());
        }
        let connection = Arc::new(Connection::open(&self.config, port).await?);
        connections.insert(port, connection.clone());
        tracing::info!(port, "Connected to chat daemon");
        Ok(connection)
    }

    /// The connection for `port`, if one was opened.
    pub async fn get(&self, port: u16) -> Option<Arc<Connection>> {
        self.connections.lock().await.get(&port).cloned()
    }
}

// ── Connection ─────────────────────────────────────────────────────

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// A live websocket to one daemon port.
pub struct Connection {
    port: u16,
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    /// Set by the reader once the socket is gone.
    closed: Arc<AtomicBool>,
    send_lock: tokio::sync::Mutex<()>,
    last_corr_id: AtomicU64,
    response_timeout: Duration,
}

impl Connection {
    async fn open(config: &TransportConfig, port: u16) -> Result<Self> {
        let url = format!("ws://{}:{port}", config.host);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|source| {
                tracing::error!(port, error = %source, "Failed to connect to chat daemon");
                SdkError::Connect {
                    port,
                    source: Box::new(source),
                }
            })?;
        let (mut sink, mut stream) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    tracing::error!(port, error = %e, "Websocket write failed");
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes = pending.clone();
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(frame @ WsMessage::Text(_)) => match frame.to_text() {
                        Ok(text) => route_frame(&routes, port, text),
                        Err(e) => tracing::warn!(port, error = %e, "Dropping undecodable text frame"),
                    },
                    Ok(WsMessage::Binary(data)) => {
                        tracing::warn!(port, bytes = data.len(), "Ignoring binary frame from chat daemon");
                    }
                    Ok(WsMessage::Close(frame)) => {
                        tracing::warn!(port, ?frame, "Disconnected from chat daemon");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(port, error = %e, "Websocket read failed");
                        break;
                    }
                }
            }
            // Mark closed before failing the waiters, so a `send` that
            // registers after the clear still sees the flag.
            reader_closed.store(true, Ordering::SeqCst);
            routes.lock().clear();
        });

        Ok(Self {
            port,
            outbound,
            pending,
            closed,
            send_lock: tokio::sync::Mutex::new(()),
            last_corr_id: AtomicU64::new(0),
            response_timeout: config.response_timeout,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True once the daemon closed the socket or reading from it failed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its reply.
    pub async fn send(&self, command: &str) -> Result<ChatResponse> {
        let _serial = self.send_lock.lock().await;

        let corr_id = self.next_corr_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(corr_id.clone(), tx);
        if self.is_closed() {
            self.pending.lock().remove(&corr_id);
            return Err(SdkError::Closed { port: self.port });
        }

        tracing::debug!(port = self.port, corr_id = %corr_id, command, "Sending command");
        if self
            .outbound
            .send(protocol::request_frame(&corr_id, command))
            .is_err()
        {
            self.pending.lock().remove(&corr_id);
            return Err(SdkError::Closed { port: self.port });
        }

        let frame = match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(SdkError::Closed { port: self.port }),
            Err(_) => {
                self.pending.lock().remove(&corr_id);
                tracing::error!(port = self.port, corr_id = %corr_id, command, "Timeout waiting for reply");
                return Err(SdkError::Timeout {
                    command: command.to_string(),
                    after: self.response_timeout,
                });
            }
        };

        protocol::decode_response(&frame)
    }

    /// Wall-clock milliseconds, bumped past the previous id when the clock
    /// has not moved.
    fn next_corr_id(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_corr_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_corr_id.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

impl CommandTransport for Connection {
    fn send<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<ChatResponse>> {
        Box::pin(Connection::send(self, command))
    }
}

fn route_frame(pending: &Pending, port: u16, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(port, error = %e, "Dropping non-JSON frame from chat daemon");
            return;
        }
    };
    let Some(corr_id) = protocol::frame_corr_id(&frame) else {
        tracing::trace!(port, "Dropping unsolicited frame");
        return;
    };
    let waiter = pending.lock().remove(&corr_id);
    match waiter {
        Some(tx) => {
            // The waiter may have timed out in the meantime.
            let _ = tx.send(frame);
        }
        None => tracing::warn!(port, corr_id = %corr_id, "Dropping reply with no waiting command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_with(corr_id: &str) -> (Pending, oneshot::Receiver<Value>) {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(corr_id.to_string(), tx);
        (pending, rx)
    }

    #[test]
    fn routes_reply_to_its_waiter() {
        let (pending, mut rx) = pending_with("17");
        route_frame(&pending, 5225, r#"{"corrId":"17","resp":{"type":"cmdOk"}}"#);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame["resp"]["type"], "cmdOk");
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn drops_frames_without_corr_id_or_unknown_id() {
        let (pending, mut rx) = pending_with("17");
        route_frame(&pending, 5225, r#"{"resp":{"type":"newChatItems"}}"#);
        route_frame(&pending, 5225, r#"{"corrId":"99","resp":{"type":"cmdOk"}}"#);
        route_frame(&pending, 5225, "not json");
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.lock().len(), 1);
    }
}
