use crate::{AgentosError, AgentosResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque task identifier, assigned at intake.
pub type TaskId = Uuid;

/// Free-form task metadata. Values are restricted to JSON scalars at intake.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Scheduling priority of a task. Ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Dispatched ahead of low and medium work.
    High,
    /// Highest tier; aging never bumps past it.
    Urgent,
}

impl Priority {
    /// All tiers, lowest first.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    /// Zero-based tier index (`Low` = 0).
    pub fn tier(self) -> usize {
        self as usize
    }

    /// The priority `steps` tiers above this one, capped at [`Priority::Urgent`].
    pub fn bumped(self, steps: usize) -> Priority {
        let idx = self.tier().saturating_add(steps).min(Priority::Urgent.tier());
        Priority::ALL[idx]
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AgentosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(AgentosError::Validation(format!(
                "unknown priority '{other}' (expected low, medium, high or urgent)"
            ))),
        }
    }
}

/// Agent specialization a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Decomposes broad goals into steps.
    Planner,
    /// Gathers information and sources.
    Researcher,
    /// Examines data and compares figures.
    Analyst,
    /// Produces prose.
    Writer,
    /// Catch-all for anything unclassified.
    General,
}

impl Capability {
    /// Every capability, in classifier precedence order.
    pub const ALL: [Capability; 5] = [
        Capability::Planner,
        Capability::Researcher,
        Capability::Analyst,
        Capability::Writer,
        Capability::General,
    ];

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Planner => "planner",
            Capability::Researcher => "researcher",
            Capability::Analyst => "analyst",
            Capability::Writer => "writer",
            Capability::General => "general",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = AgentosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planner" => Ok(Capability::Planner),
            "researcher" => Ok(Capability::Researcher),
            "analyst" => Ok(Capability::Analyst),
            "writer" => Ok(Capability::Writer),
            "general" => Ok(Capability::General),
            other => Err(AgentosError::Validation(format!("unknown capability '{other}'"))),
        }
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// queued -> assigned -> running -> completed
///    |          |          |  \--> failed
///    |          |          \-----> queued   (retryable failure)
///    \----------+----------------> failed   (cancellation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the scheduler.
    Queued,
    /// Dequeued by a worker, not yet started.
    Assigned,
    /// Agent logic is executing.
    Running,
    /// Finished with a result payload.
    Completed,
    /// Finished with an error record.
    Failed,
}

impl TaskStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Assigned)
                | (Queued, Failed)
                | (Assigned, Running)
                | (Assigned, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Queued)
        )
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The agent reported an error that retrying cannot fix.
    Permanent,
    /// The final attempt exceeded the capability deadline.
    Timeout,
    /// Transient failures consumed the whole retry budget.
    RetriesExhausted,
    /// The task was cancelled by a client.
    Cancelled,
    /// The engine itself failed while handling the task.
    Internal,
}

/// Error record attached to a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Failure class.
    pub kind: TaskErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl TaskError {
    /// Build an error record.
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error record for a client cancellation.
    pub fn cancelled() -> Self {
        Self::new(TaskErrorKind::Cancelled, "cancelled by request")
    }
}

/// A submitted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned at intake, never changes.
    pub id: TaskId,
    /// Sanitized task text.
    pub input: String,
    /// Priority requested at submission.
    pub priority: Priority,
    /// Scalar metadata supplied by the submitter.
    #[serde(default)]
    pub metadata: Metadata,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Capability chosen by the classifier.
    pub capability: Capability,
    /// Agent payload, set on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error record, set on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Identity the task was submitted under.
    pub submitter: String,
    /// Intake time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
    /// Retryable failures consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Agent time of the successful attempt, set on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl Task {
    /// Create a new queued task.
    pub fn new(
        input: impl Into<String>,
        priority: Priority,
        metadata: Metadata,
        capability: Capability,
        submitter: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            priority,
            metadata,
            status: TaskStatus::Queued,
            capability,
            result: None,
            error: None,
            submitter: submitter.into(),
            created_at: now,
            updated_at: now,
            retry_count: 0,
            processing_time_ms: None,
        }
    }

    /// Move to `next`, refusing anything the state machine does not allow.
    pub fn transition(&mut self, next: TaskStatus) -> AgentosResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AgentosError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `running -> completed` with the agent's payload.
    pub fn complete(&mut self, payload: serde_json::Value) -> AgentosResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(payload);
        Ok(())
    }

    /// Like [`complete`](Self::complete), also recording how long the
    /// successful attempt took.
    pub fn complete_in(
        &mut self,
        payload: serde_json::Value,
        processing_time_ms: u64,
    ) -> AgentosResult<()> {
        self.complete(payload)?;
        self.processing_time_ms = Some(processing_time_ms);
        Ok(())
    }

    /// Any non-terminal state `-> failed` with an error record.
    pub fn fail(&mut self, error: TaskError) -> AgentosResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// `running -> queued` after a retryable failure, consuming one retry.
    pub fn requeue(&mut self, max_retries: u32) -> AgentosResult<()> {
        if self.retry_count >= max_retries {
            return Err(AgentosError::Orchestrator(format!(
                "task {} has exhausted its {max_retries} retries",
                self.id
            )));
        }
        self.transition(TaskStatus::Queued)?;
        self.retry_count += 1;
        Ok(())
    }

    /// Whether the task has reached `completed` or `failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read-only projection of a task returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    /// Task id.
    pub id: TaskId,
    /// Sanitized task text.
    pub input: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Routed capability.
    pub capability: Capability,
    /// Submitted priority.
    pub priority: Priority,
    /// Retryable failures consumed so far.
    pub retry_count: u32,
    /// Agent payload, present once `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error record, present once `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Agent time of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// Intake time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            input: task.input.clone(),
            status: task.status,
            capability: task.capability,
            priority: task.priority,
            retry_count: task.retry_count,
            result: task.result.clone(),
            error: task.error.clone(),
            processing_time_ms: task.processing_time_ms,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}
