//! Core types and error definitions for the agentos task engine.
//!
//! This crate provides the foundational types shared across all agentos crates:
//! the task model and its lifecycle state machine, the events published on every
//! transition, and the unified error type.
//!
//! # Main types
//!
//! - [`AgentosError`] - Unified error enum for all agentos subsystems.
//! - [`AgentosResult`] - Convenience alias for `Result<T, AgentosError>`.
//! - [`Task`] - A submitted unit of work and its current lifecycle state.
//! - [`TaskStatus`] - The lifecycle state machine.
//! - [`Capability`] - The agent specialization a task is routed to.
//! - [`TaskEvent`] - The record published for every status transition.

/// Lifecycle events published to observers.
pub mod event;
/// Task model, priorities, capabilities and the status state machine.
pub mod task;

pub use event::{Delivery, TaskEvent};
pub use task::{
    Capability, Metadata, Priority, Task, TaskError, TaskErrorKind, TaskId, TaskStatus, TaskView,
};

// --- Error types ---

/// Top-level error type for the agentos engine.
///
/// Each variant corresponds to a failure class surfaced to callers of the
/// orchestrator or produced by one of its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum AgentosError {
    /// Malformed or oversized input, rejected before queueing.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Admission was denied for the submitter; the client should retry later.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// No task with the given id is known.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// A status change that the lifecycle state machine does not permit.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// The task whose transition was refused.
        task_id: TaskId,
        /// Status the task was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },

    /// The durable task store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by the orchestrator itself (wiring, lifecycle).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error from the HTTP / WebSocket gateway layer.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`AgentosError`].
pub type AgentosResult<T> = Result<T, AgentosError>;
