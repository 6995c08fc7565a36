use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound frames buffered per connection. When the socket stalls, senders
/// wait here and undelivered events pile up in the hub outboxes instead.
pub const OUTBOUND_BUFFER: usize = 32;

/// A connected WebSocket client.
#[derive(Debug)]
pub struct Connection {
    /// Server-side connection id.
    pub id: Uuid,
    /// Identity the client connected as, if it gave one.
    pub submitter: Option<String>,
    /// Outbound frames, drained by the connection's writer task.
    pub tx: mpsc::Sender<String>,
}

impl Connection {
    /// A connection and the receiving end its writer task drains.
    pub fn open(id: Uuid, submitter: Option<String>) -> (Self, mpsc::Receiver<String>) {
        Self::with_buffer(id, submitter, OUTBOUND_BUFFER)
    }

    /// Like [`open`](Self::open) with an explicit buffer size.
    pub fn with_buffer(
        id: Uuid,
        submitter: Option<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { id, submitter, tx }, rx)
    }
}

/// Tracks live WebSocket connections.
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionManager {
    /// An empty manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection.
    pub async fn add(&self, conn: Connection) {
        let id = conn.id;
        let submitter = conn.submitter.clone();
        self.connections.write().await.insert(id, conn);
        tracing::info!(
            connection_id = %id,
            submitter = submitter.as_deref().unwrap_or("-"),
            "Connection added"
        );
    }

    /// Forget a connection. Its writer task ends once every sender is dropped.
    pub async fn remove(&self, id: Uuid) -> Option<Connection> {
        let removed = self.connections.write().await.remove(&id);
        if let Some(conn) = &removed {
            tracing::info!(
                connection_id = %id,
                submitter = conn.submitter.as_deref().unwrap_or("-"),
                "Connection removed"
            );
        }
        removed
    }

    /// Queue a frame for one connection, waiting while its buffer is full.
    /// Returns `false` if the connection is gone.
    pub async fn send_to(&self, id: Uuid, message: String) -> bool {
        let tx = match self.connections.read().await.get(&id) {
            Some(conn) => conn.tx.clone(),
            None => return false,
        };
        tx.send(message).await.is_ok()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }
}
