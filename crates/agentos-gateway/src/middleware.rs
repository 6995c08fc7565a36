use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the caller's identity. Authentication itself happens
/// upstream; the gateway trusts this value.
pub const SUBMITTER_HEADER: &str = "x-submitter-id";

/// API-key gate for the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Accepted keys. Empty means every request is let through.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Gate on the given keys.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Whether at least one key is configured.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Query string fallback for clients (browsers' WebSocket API) that cannot
/// set headers.
#[derive(Deserialize, Default)]
pub struct AuthQuery {
    /// Key passed as `?api_key=`.
    pub api_key: Option<String>,
    /// Identity passed as `?submitter=`.
    pub submitter: Option<String>,
}

/// Checks `Authorization: Bearer <key>` first, then `?api_key=<key>`.
/// `/health` is always open.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.api_key.clone());

    match key {
        Some(k) if auth.api_keys.contains(&k) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            ApiError::new(StatusCode::UNAUTHORIZED, "invalid API key").into_response()
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            ApiError::new(StatusCode::UNAUTHORIZED, "API key required").into_response()
        }
    }
}

/// The submitter a request acts for, taken from [`SUBMITTER_HEADER`] or the
/// `submitter` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter(pub String);

impl<S> FromRequestParts<S> for Submitter
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(SUBMITTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let id = match from_header {
            Some(id) => Some(id),
            None => Query::<AuthQuery>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|Query(q)| q.submitter)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        };
        id.map(Submitter).ok_or_else(|| {
            ApiError::bad_request(format!("missing {SUBMITTER_HEADER} header"))
        })
    }
}
