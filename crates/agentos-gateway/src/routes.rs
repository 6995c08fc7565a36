use crate::error::ApiError;
use crate::middleware::Submitter;
use crate::server::AppState;
use agentos_core::{Capability, Metadata, Priority, TaskId, TaskStatus, TaskView};
use agentos_orchestrator::SubmitRequest;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest page `GET /api/tasks` will return.
pub const MAX_PAGE: usize = 100;
const DEFAULT_PAGE: usize = 20;
const PREVIEW_CHARS: usize = 100;

/// Body of `POST /api/tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    /// The task text.
    pub input_text: String,
    /// `low`, `medium`, `high` or `urgent`; `medium` when absent.
    #[serde(default)]
    pub priority: Option<String>,
    /// Free-form scalar metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Reply to an accepted submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    /// Id of the new task.
    pub task_id: TaskId,
    /// Always `queued`.
    pub status: TaskStatus,
    /// Capability the task was routed to.
    pub capability: Capability,
    /// Rough processing estimate in seconds.
    pub estimated_time: u64,
}

/// Paging for `GET /api/tasks`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_page")]
    limit: usize,
}

fn default_page() -> usize {
    DEFAULT_PAGE
}

/// One row of `GET /api/tasks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Input text, cut to a preview.
    pub input: String,
    /// Current status.
    pub status: TaskStatus,
    /// Submitted priority.
    pub priority: Priority,
    /// Routed capability.
    pub capability: Capability,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A tenth of a second per word, capped at a minute.
fn estimate_seconds(text: &str) -> u64 {
    let words = text.split_whitespace().count() as u64;
    (words / 10).min(60)
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

pub(crate) async fn create_task(
    State(state): State<Arc<AppState>>,
    Submitter(submitter): Submitter,
    body: Result<Json<CreateTaskBody>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let priority = body
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?
        .unwrap_or_default();
    let estimated_time = estimate_seconds(&body.input_text);

    let mut request = SubmitRequest::new(body.input_text, submitter).with_priority(priority);
    request.metadata = body.metadata;
    let receipt = state.orchestrator.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTaskResponse {
            task_id: receipt.task_id,
            status: receipt.status,
            capability: receipt.capability,
            estimated_time,
        }),
    ))
}

pub(crate) async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskView>, ApiError> {
    Ok(Json(state.orchestrator.get_status(id).await?))
}

pub(crate) async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Response, ApiError> {
    if state.orchestrator.cancel(id).await? {
        return Ok(Json(serde_json::json!({ "task_id": id, "cancelled": true })).into_response());
    }
    let body = serde_json::json!({
        "task_id": id,
        "cancelled": false,
        "error": "task already finished",
    });
    Ok((StatusCode::CONFLICT, Json(body)).into_response())
}

pub(crate) async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Submitter(submitter): Submitter,
    Query(page): Query<ListQuery>,
) -> Result<Json<Vec<TaskSummary>>, ApiError> {
    let limit = page.limit.min(MAX_PAGE);
    let tasks = state
        .orchestrator
        .list_tasks(&submitter, page.skip, limit)
        .await?;
    let rows = tasks
        .into_iter()
        .map(|t| TaskSummary {
            id: t.id,
            input: preview(&t.input),
            status: t.status,
            priority: t.priority,
            capability: t.capability,
            created_at: t.created_at,
        })
        .collect();
    Ok(Json(rows))
}

pub(crate) async fn system_metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let metrics = state.orchestrator.metrics().await;
    let mut body = serde_json::to_value(&metrics).map_err(agentos_core::AgentosError::from)?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "websocket_connections".into(),
            state.connections.connection_count().await.into(),
        );
    }
    Ok(Json(body).into_response())
}

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.orchestrator.is_running() { "healthy" } else { "stopped" },
        "service": "agentos",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
