//! Persistent-connection transport over a websocket.
//!
//! All tables share one connection. Outgoing `sync` frames are answered by a
//! `sync_result` frame for the same table, so at most one request per table
//! may be in flight; a second one fails fast with
//! [`Error::SyncInFlight`](crate::Error::SyncInFlight). Each request carries
//! an id the server echoes; a reply for a request that already timed out is
//! dropped instead of resolving a newer request for the table. When the
//! connection drops, every pending request fails with `ConnectionLost` and the next
//! request reconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{ClientFrame, ServerFrame};
use super::{SyncAdapter, SyncMessage};
use crate::{error::Result, Error, TableName};

/// Configuration for [`WebSocketAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    pub url: String,
    /// Upper bound on waiting for a `sync_result`
    pub request_timeout: Duration,
    /// Capacity of the push broadcast channel
    pub push_buffer: usize,
    pub bearer_token: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/ws".to_string(),
            request_timeout: Duration::from_secs(30),
            push_buffer: 64,
            bearer_token: None,
        }
    }
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_push_buffer(mut self, capacity: usize) -> Self {
        self.push_buffer = capacity;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// A live connection: the writer task's queue plus a flag the reader task
/// sets when the socket ends.
#[derive(Debug, Clone)]
struct Connection {
    id: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct PendingRequest {
    connection: u64,
    request_id: u64,
    waiter: oneshot::Sender<Result<SyncMessage>>,
}

type PendingMap = DashMap<TableName, PendingRequest>;

/// Sync adapter multiplexing all tables over one websocket.
#[derive(Debug)]
pub struct WebSocketAdapter {
    config: WebSocketConfig,
    connection: Mutex<Option<Connection>>,
    pending: Arc<PendingMap>,
    pushes: broadcast::Sender<SyncMessage>,
    next_connection: AtomicU64,
    next_request: AtomicU64,
}

impl WebSocketAdapter {
    /// Create an adapter. No connection is made until the first request or
    /// [`SyncAdapter::initialize`].
    pub fn new(config: WebSocketConfig) -> Self {
        let (pushes, _) = broadcast::channel(config.push_buffer.max(1));
        Self {
            config,
            connection: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            pushes,
            next_connection: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Whether a connection is currently up.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the connection. Pending requests fail with `ConnectionLost`.
    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            let _ = connection.outgoing.send(Message::Close(None));
            tracing::debug!(conn_id = connection.id, "WebSocket disconnect requested");
        }
    }

    async fn ensure_connected(&self) -> Result<Connection> {
        let mut current = self.connection.lock().await;
        if let Some(connection) = current.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
        }

        let connection = self.connect().await?;
        *current = Some(connection.clone());
        Ok(connection)
    }

    async fn connect(&self) -> Result<Connection> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::sync(format!("invalid websocket url {}: {}", self.config.url, e)))?;
        if let Some(token) = &self.config.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::sync(format!("invalid bearer token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| Error::sync(format!("connect to {} failed: {}", self.config.url, e)))?;
        let (mut sink, mut stream) = socket.split();

        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending = Arc::clone(&self.pending);
        let pushes = self.pushes.clone();
        let reader_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(text.as_str(), id, &pending, &pushes),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(conn_id = id, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            fail_pending(&pending, id);
            tracing::info!(conn_id = id, "WebSocket connection closed");
        });

        tracing::info!(conn_id = id, url = %self.config.url, "WebSocket connected");
        Ok(Connection {
            id,
            outgoing,
            closed,
        })
    }

    fn release(&self, table: &str, request_id: u64) {
        self.pending
            .remove_if(table, |_, request| request.request_id == request_id);
    }
}

/// Route one incoming frame to its waiter or to push subscribers.
fn dispatch(
    text: &str,
    connection: u64,
    pending: &PendingMap,
    pushes: &broadcast::Sender<SyncMessage>,
) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn_id = connection, error = %e, "Undecodable server frame");
            return;
        }
    };

    match frame {
        ServerFrame::SyncResult {
            table,
            items,
            request_id,
        } => {
            let message = SyncMessage::new(table, items);
            match pending.remove_if(&message.table, |_, request| {
                answers(request, connection, request_id)
            }) {
                Some((_, request)) => {
                    let _ = request.waiter.send(Ok(message));
                }
                None if request_id.is_some() => {
                    tracing::debug!(
                        table = %message.table,
                        request_id,
                        "Discarding sync result for a released request"
                    );
                }
                None => {
                    tracing::debug!(table = %message.table, "Unsolicited sync result, treating as push");
                    let _ = pushes.send(message);
                }
            }
        }
        ServerFrame::Push { table, items } => {
            let _ = pushes.send(SyncMessage::new(table, items));
        }
        ServerFrame::Error {
            table: Some(table),
            message,
            request_id,
        } => match pending.remove_if(&table, |_, request| {
            answers(request, connection, request_id)
        }) {
            Some((_, request)) => {
                let _ = request.waiter.send(Err(Error::sync(message)));
            }
            None => tracing::warn!(table = %table, error = %message, "Server error for idle table"),
        },
        ServerFrame::Error {
            table: None,
            message,
            ..
        } => {
            tracing::warn!(conn_id = connection, error = %message, "Server error");
        }
        ServerFrame::Pong => {}
    }
}

/// Whether a reply belongs to `request`. Replies without a request id
/// match on table and connection alone.
fn answers(request: &PendingRequest, connection: u64, request_id: Option<u64>) -> bool {
    request.connection == connection && request_id.map_or(true, |id| id == request.request_id)
}

/// Fail every request still waiting on `connection`.
fn fail_pending(pending: &PendingMap, connection: u64) {
    let tables: Vec<TableName> = pending
        .iter()
        .filter(|entry| entry.connection == connection)
        .map(|entry| entry.key().clone())
        .collect();

    for table in tables {
        if let Some((_, request)) =
            pending.remove_if(&table, |_, request| request.connection == connection)
        {
            tracing::warn!(table = %table, "Connection lost with sync in flight");
            let _ = request.waiter.send(Err(Error::ConnectionLost));
        }
    }
}

#[async_trait]
impl SyncAdapter for WebSocketAdapter {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    async fn synchronize(&self, message: SyncMessage) -> Result<SyncMessage> {
        let table = message.table.clone();
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&ClientFrame::sync(message, Some(request_id)))
            .map_err(|e| Error::sync(format!("failed to encode sync frame: {}", e)))?;

        let connection = self.ensure_connected().await?;
        let (waiter, reply) = oneshot::channel();

        match self.pending.entry(table.clone()) {
            Entry::Occupied(_) => return Err(Error::SyncInFlight(table)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    connection: connection.id,
                    request_id,
                    waiter,
                });
            }
        }

        // The reader may have ended between connecting and registering
        if connection.is_closed() {
            self.release(&table, request_id);
            return Err(Error::ConnectionLost);
        }

        if connection.outgoing.send(Message::Text(text.into())).is_err() {
            self.release(&table, request_id);
            return Err(Error::ConnectionLost);
        }

        match tokio::time::timeout(self.config.request_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.release(&table, request_id);
                tracing::warn!(table = %table, "Sync request timed out");
                Err(Error::Timeout(self.config.request_timeout.as_millis() as u64))
            }
        }
    }

    fn subscribe_pushes(&self) -> Option<broadcast::Receiver<SyncMessage>> {
        Some(self.pushes.subscribe())
    }
}
