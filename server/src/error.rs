// HTTP error mapping for non-streaming paths.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use weknora_core::WeKnoraError;

/// API-level error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl From<WeKnoraError> for ApiError {
    fn from(err: WeKnoraError) -> Self {
        let status = match &err {
            WeKnoraError::InvalidArgument(_) | WeKnoraError::NoKnowledgeBase(_) => {
                StatusCode::BAD_REQUEST
            }
            WeKnoraError::NotFound(_) => StatusCode::NOT_FOUND,
            WeKnoraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WeKnoraError::Cancelled(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
    }
}
