//! API error type and the Google error-envelope response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use mimiq_core::Error as CoreError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// The error envelope Cloud Tasks clients parse.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The wrapped error.
    pub error: ErrorBody,
}

/// Error payload inside the envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// HTTP status code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// google.rpc status name.
    pub status: String,
}

/// HTTP API error with its google.rpc status name.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    rpc_status: &'static str,
    message: String,
}

impl ApiError {
    /// 400 `INVALID_ARGUMENT`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
    }

    /// 404 `NOT_FOUND`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 501 `UNIMPLEMENTED`.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, "UNIMPLEMENTED", message)
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the google.rpc status name.
    #[must_use]
    pub const fn rpc_status(&self) -> &'static str {
        self.rpc_status
    }

    fn new(status: StatusCode, rpc_status: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            rpc_status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.status.as_u16(),
                message: self.message,
                status: self.rpc_status.to_string(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        let status = match &value {
            CoreError::InvalidArgument(_) | CoreError::FailedPrecondition(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::AlreadyExists { .. } => StatusCode::CONFLICT,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            CoreError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = value.to_string();
        Self::new(status, value.status_name(), message)
    }
}
