//! Durable task records for the agentos engine.
//!
//! The orchestrator only talks to [`TaskStore`]; the two implementations here
//! cover tests and single-node deployments.

/// In-memory and file-backed task stores.
pub mod store;

pub use store::{FileTaskStore, InMemoryTaskStore, TaskStore};
