//! HTTP and WebSocket gateway for the agentos task engine.
//!
//! Exposes task submission, status, cancellation, listing and metrics as a
//! JSON API, and a `/ws` channel that streams per-task status events from the
//! notification hub.
//!
//! # Main types
//!
//! - [`GatewayServer`] - Builds the axum [`Router`](axum::Router).
//! - [`AuthConfig`] - Optional API-key gate.
//! - [`ClientMessage`] / [`ServerMessage`] - The WebSocket protocol.

/// Live WebSocket connection tracking.
pub mod connection;
/// Engine errors as HTTP responses.
pub mod error;
/// API-key gate and submitter extraction.
pub mod middleware;
/// WebSocket protocol and per-connection subscriptions.
pub mod router;
mod routes;
/// Router assembly and the WebSocket handler.
pub mod server;

pub use error::ApiError;
pub use middleware::{AuthConfig, Submitter, SUBMITTER_HEADER};
pub use router::{ClientMessage, ServerMessage};
pub use routes::{CreateTaskResponse, TaskSummary, MAX_PAGE};
pub use server::GatewayServer;
