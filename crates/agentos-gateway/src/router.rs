use crate::connection::ConnectionManager;
use agentos_core::{Delivery, TaskEvent, TaskId};
use agentos_orchestrator::{Orchestrator, Subscription, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A message sent by a WebSocket client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving a task's status events.
    #[serde(alias = "subscribe_task")]
    Subscribe {
        /// Task to follow.
        task_id: TaskId,
    },
    /// Stop receiving a task's events.
    #[serde(alias = "unsubscribe_task")]
    Unsubscribe {
        /// Task to stop following.
        task_id: TaskId,
    },
    /// Confirm the terminal event was received.
    #[serde(alias = "acknowledge")]
    Ack {
        /// Task whose terminal event is acknowledged.
        task_id: TaskId,
    },
    /// Liveness check.
    Ping,
}

/// A message pushed to a WebSocket client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the upgrade.
    Connected {
        /// Server-side id of this connection.
        connection_id: Uuid,
    },
    /// A subscription was opened. Replayed history follows.
    Subscribed {
        /// Followed task.
        task_id: TaskId,
        /// Hub subscription id.
        subscription_id: SubscriptionId,
    },
    /// A subscription was closed by the client.
    Unsubscribed {
        /// Task no longer followed.
        task_id: TaskId,
    },
    /// One status transition.
    TaskUpdate(TaskEvent),
    /// Events were dropped for this client; re-fetch the task over HTTP.
    Gap {
        /// Task whose events were dropped.
        task_id: TaskId,
        /// How many were dropped.
        missed: u64,
    },
    /// Reply to `ack`.
    Acknowledged {
        /// Acknowledged task.
        task_id: TaskId,
        /// Whether the subscription was released. `false` while the task is
        /// still live.
        released: bool,
    },
    /// Reply to `ping`.
    Pong,
    /// The last client message could not be handled.
    Error {
        /// What went wrong.
        message: String,
        /// Task the failed request referred to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
}

impl ServerMessage {
    /// An error reply.
    pub fn error(message: impl Into<String>, task_id: Option<TaskId>) -> Self {
        Self::Error {
            message: message.into(),
            task_id,
        }
    }

    /// Serialize for the wire.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }
}

impl From<Delivery> for ServerMessage {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Event(event) => ServerMessage::TaskUpdate(event),
            Delivery::Gap { task_id, missed } => ServerMessage::Gap { task_id, missed },
        }
    }
}

struct Forwarder {
    subscription: Arc<Subscription>,
    handle: JoinHandle<()>,
}

/// Per-connection subscription table.
///
/// Each subscription gets a forwarder task that drains its outbox into the
/// connection's outbound channel, so a slow socket only ever backs up its own
/// outboxes.
pub struct MessageRouter {
    connection_id: Uuid,
    orchestrator: Arc<Orchestrator>,
    connections: Arc<ConnectionManager>,
    subscriptions: HashMap<TaskId, Forwarder>,
}

impl MessageRouter {
    /// A router for one connection.
    pub fn new(
        connection_id: Uuid,
        orchestrator: Arc<Orchestrator>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            connection_id,
            orchestrator,
            connections,
            subscriptions: HashMap::new(),
        }
    }

    /// Parse and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Unparseable client message");
                self.reply(ServerMessage::error(format!("invalid message: {e}"), None))
                    .await;
            }
        }
    }

    /// Handle one client message.
    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe { task_id } => self.subscribe(task_id).await,
            ClientMessage::Unsubscribe { task_id } => {
                match self.subscriptions.remove(&task_id) {
                    Some(forwarder) => {
                        forwarder.handle.abort();
                        self.orchestrator.unsubscribe(&forwarder.subscription);
                        self.reply(ServerMessage::Unsubscribed { task_id }).await;
                    }
                    None => {
                        self.reply(ServerMessage::error("not subscribed", Some(task_id)))
                            .await;
                    }
                }
            }
            ClientMessage::Ack { task_id } => {
                let Some(forwarder) = self.subscriptions.get(&task_id) else {
                    self.reply(ServerMessage::error("not subscribed", Some(task_id)))
                        .await;
                    return;
                };
                let released = self.orchestrator.acknowledge(&forwarder.subscription);
                if released {
                    self.subscriptions.remove(&task_id);
                }
                self.reply(ServerMessage::Acknowledged { task_id, released })
                    .await;
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong).await,
        }
    }

    async fn subscribe(&mut self, task_id: TaskId) {
        if self.subscriptions.contains_key(&task_id) {
            self.reply(ServerMessage::error("already subscribed", Some(task_id)))
                .await;
            return;
        }
        let subscription = match self.orchestrator.subscribe(task_id).await {
            Ok(subscription) => Arc::new(subscription),
            Err(e) => {
                self.reply(ServerMessage::error(e.to_string(), Some(task_id)))
                    .await;
                return;
            }
        };
        // Confirmation goes out before the forwarder can push replayed events.
        self.reply(ServerMessage::Subscribed {
            task_id,
            subscription_id: subscription.id(),
        })
        .await;

        let connections = self.connections.clone();
        let connection_id = self.connection_id;
        let feed = subscription.clone();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = feed.recv().await {
                let text = ServerMessage::from(delivery).to_text();
                if !connections.send_to(connection_id, text).await {
                    break;
                }
            }
        });
        info!(connection_id = %self.connection_id, task_id = %task_id, "Subscribed");
        self.subscriptions.insert(
            task_id,
            Forwarder {
                subscription,
                handle,
            },
        );
    }

    async fn reply(&self, message: ServerMessage) {
        if !self
            .connections
            .send_to(self.connection_id, message.to_text())
            .await
        {
            warn!(connection_id = %self.connection_id, "Reply dropped, connection gone");
        }
    }

    /// Number of open subscriptions on this connection.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Close every subscription of this connection.
    pub fn close(&mut self) {
        for (_, forwarder) in self.subscriptions.drain() {
            self.orchestrator.unsubscribe(&forwarder.subscription);
            forwarder.handle.abort();
        }
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.close();
    }
}
