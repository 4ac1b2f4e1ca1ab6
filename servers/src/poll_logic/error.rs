//! # API Error
//!
//! Maps the voting core's error kinds onto HTTP status codes and a JSON body
//! of the form `{"errorType": ..., "message": ...}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_polls::{AuthError, VoteError};
use serde_json::json;
use tracing::error;

/// Error returned by every API handler.
#[derive(Debug)]
pub struct ApiError(pub VoteError);

impl From<VoteError> for ApiError {
    fn from(err: VoteError) -> Self {
        ApiError(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(VoteError::from(err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VoteError::NotFound => StatusCode::NOT_FOUND,
            VoteError::NotYetOpen
            | VoteError::Closed
            | VoteError::DuplicateVote
            | VoteError::InvalidOption { .. }
            | VoteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VoteError::Unauthorized => StatusCode::UNAUTHORIZED,
            VoteError::Forbidden => StatusCode::FORBIDDEN,
            VoteError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match &self.0 {
            VoteError::NotFound => "NotFound",
            VoteError::NotYetOpen => "NotYetOpen",
            VoteError::Closed => "Closed",
            VoteError::DuplicateVote => "DuplicateVote",
            VoteError::InvalidOption { .. } => "InvalidOption",
            VoteError::InvalidInput(_) => "InvalidInput",
            VoteError::Storage(_) => "StorageError",
            VoteError::Unauthorized => "Unauthorized",
            VoteError::Forbidden => "Forbidden",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            // Backend details stay in the logs.
            VoteError::Storage(detail) => {
                error!("Storage error: {}", detail);
                "Server error. The request did not take effect and may be retried.".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "errorType": self.error_type(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}
