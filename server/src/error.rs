use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by chat operations.
///
/// Push failures (recipient offline, full session queue) are never
/// represented here: persistence is authoritative and live delivery is
/// best-effort.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot edit messages older than the edit window")]
    WindowExpired,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ChatError::InvalidArgument(reason.into())
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("store task failed: {}", err))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ChatError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ChatError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ChatError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ChatError::WindowExpired => (StatusCode::BAD_REQUEST, self.to_string()),
            ChatError::Internal(detail) => {
                tracing::error!(error = %detail, "Chat operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
