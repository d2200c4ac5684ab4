//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::pipeline::WebhookError;
use crate::queue::QueueError;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Server-side failures answer with a bare "Internal Server Error"; the
/// detail is logged where it happened.
impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err.status_code() {
            400 => Self::bad_request(err.to_string()),
            403 => Self::forbidden(err.to_string()),
            _ => {
                if let WebhookError::Queue(e) = &err {
                    error!(error = %e, "Failed to enqueue webhook event");
                }
                Self::internal("Internal Server Error")
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        error!(error = %err, "Queue request failed");
        Self::internal("Internal Server Error")
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
