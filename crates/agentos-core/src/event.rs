use crate::task::{Task, TaskError, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single status transition, as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the event belongs to.
    pub task_id: TaskId,
    /// Status entered.
    pub status: TaskStatus,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Retries consumed when the transition happened.
    pub retry_count: u32,
    /// Result payload, present only on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error record, present only on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskEvent {
    /// Snapshot the task's current state as an event.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            timestamp: task.updated_at,
            retry_count: task.retry_count,
            payload: task.result.clone(),
            error: task.error.clone(),
        }
    }

    /// Whether this event closes the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What a subscriber reads from its outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delivery {
    /// A status transition.
    Event(TaskEvent),
    /// Events were dropped because the subscriber fell behind; the subscriber
    /// should re-fetch authoritative state.
    Gap {
        /// Task whose events were dropped.
        task_id: TaskId,
        /// Number of dropped events.
        missed: u64,
    },
}
