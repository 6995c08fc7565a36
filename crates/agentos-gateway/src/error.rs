use agentos_core::AgentosError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// An engine error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// An error with an explicit status code.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 with the given message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// The status this error will be sent with.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AgentosError> for ApiError {
    fn from(err: AgentosError) -> Self {
        let status = match &err {
            AgentosError::Validation(_) | AgentosError::Json(_) => StatusCode::BAD_REQUEST,
            AgentosError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AgentosError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentosError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AgentosError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentosError::Orchestrator(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "status": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}
