//! Task orchestration and agent dispatch.
//!
//! Accepts validated tasks, routes each to a capability with a keyword
//! classifier, queues them by priority with wait-time aging and runs them on
//! bounded per-capability worker pools that retry transient failures, enforce
//! deadlines and honor cancellation. Every status change is fanned out to live
//! subscribers through the notification hub.
//!
//! # Main types
//!
//! - [`Orchestrator`] - Public entry point: submit, status, cancel, list, subscribe, metrics.
//! - [`Classifier`] - Keyword classifier mapping task text to a [`Capability`](agentos_core::Capability).
//! - [`PriorityScheduler`] - Per-capability priority queues with FIFO ties and aging.
//! - [`NotificationHub`] - Per-task pub/sub with replay and bounded outboxes.
//! - [`Agent`] - The processing logic behind one capability.
//! - [`AgentMonitor`] - Per-capability counters and processing statistics.

/// Agent trait, errors and registry.
pub mod agent;
/// Keyword classifier.
pub mod classifier;
/// Engine configuration.
pub mod config;
/// The orchestrator.
pub mod engine;
mod executor;
/// Notification hub and subscriptions.
pub mod hub;
mod ledger;
/// Pool counters and processing statistics.
pub mod monitor;
/// Built-in reference agents.
pub mod profiles;
/// Priority scheduler.
pub mod scheduler;

pub use agent::{Agent, AgentError, AgentRegistry};
pub use classifier::{Classification, Classifier};
pub use config::{CapabilitiesConfig, CapabilityConfig, OrchestratorConfig, RetryPolicy};
pub use engine::{Orchestrator, SubmitReceipt, SubmitRequest};
pub use hub::{HubConfig, NotificationHub, Subscription, SubscriptionId};
pub use monitor::{AgentMonitor, CapabilityState, ProcessingStats, SystemMetrics};
pub use profiles::{builtin_agents, Complexity};
pub use scheduler::{PriorityScheduler, QueuedTask};
