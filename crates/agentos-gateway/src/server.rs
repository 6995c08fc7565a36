use crate::connection::{Connection, ConnectionManager};
use crate::middleware::{auth_middleware, AuthConfig, AuthQuery, SUBMITTER_HEADER};
use crate::router::{MessageRouter, ServerMessage};
use crate::routes;
use agentos_orchestrator::Orchestrator;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    middleware as axum_mw,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    /// The engine behind every route.
    pub orchestrator: Arc<Orchestrator>,
    /// Live WebSocket connections.
    pub connections: Arc<ConnectionManager>,
}

/// The HTTP and WebSocket front of the engine.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without an API-key gate.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::build_with_auth(orchestrator, AuthConfig::default())
    }

    /// Build the gateway, gating every route but `/health` on `auth` when it
    /// has keys.
    pub fn build_with_auth(orchestrator: Arc<Orchestrator>, auth: AuthConfig) -> Router {
        let state = Arc::new(AppState {
            orchestrator,
            connections: ConnectionManager::new(),
        });

        let app = Router::new()
            .route(
                "/api/tasks",
                get(routes::list_tasks).post(routes::create_task),
            )
            .route(
                "/api/tasks/{id}",
                get(routes::get_task).delete(routes::cancel_task),
            )
            .route("/api/system/metrics", get(routes::system_metrics))
            .route("/health", get(routes::health))
            .route("/ws", get(ws_handler))
            .with_state(state);

        if auth.is_enabled() {
            app.layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware))
        } else {
            app
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let submitter = headers
        .get(SUBMITTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.submitter);
    ws.on_upgrade(move |socket| handle_socket(socket, state, submitter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, submitter: Option<String>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut rx) = Connection::open(connection_id, submitter.clone());
    state.connections.add(connection).await;
    info!(
        connection_id = %connection_id,
        submitter = submitter.as_deref().unwrap_or("-"),
        "WebSocket connected"
    );

    state
        .connections
        .send_to(connection_id, ServerMessage::Connected { connection_id }.to_text())
        .await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut router = MessageRouter::new(
        connection_id,
        state.orchestrator.clone(),
        state.connections.clone(),
    );
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => router.handle_text(text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
        debug!(
            connection_id = %connection_id,
            subscriptions = router.subscription_count(),
            "Closing subscriptions"
        );
        router.close();
    });

    let send_abort = send_task.abort_handle();
    let recv_abort = recv_task.abort_handle();
    tokio::select! {
        _ = send_task => recv_abort.abort(),
        _ = recv_task => send_abort.abort(),
    }

    state.connections.remove(connection_id).await;
    info!(connection_id = %connection_id, "WebSocket disconnected");
}
