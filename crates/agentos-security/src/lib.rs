//! Admission control and input hygiene for the agentos engine.
//!
//! Everything here runs before a task exists: the sanitizer rejects malformed
//! input and the rate limiter decides whether a submitter may enqueue more work.
//!
//! # Main types
//!
//! - [`RateLimiter`] - Per-submitter token bucket (the admission guard).
//! - [`AdmissionConfig`] - Bucket capacity and refill rate.
//! - [`Sanitizer`] - Task text and metadata validation.

/// Token-bucket admission control.
pub mod rate_limit;
/// Input sanitization utilities.
pub mod sanitizer;

pub use rate_limit::{AdmissionConfig, RateLimiter};
pub use sanitizer::{SanitizeResult, Sanitizer};
