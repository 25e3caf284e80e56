use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("parent folder does not exist: {0}")]
    ParentMissing(String),

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("user already exists")]
    UserExists,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} too long")]
    TooLong(&'static str),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // The conflict class keeps the original's coarse 500-with-message
            // mapping rather than 409.
            ServerError::ParentMissing(_) | ServerError::AlreadyExists(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::UserExists => (StatusCode::CONFLICT, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::TooLong(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::Db(_) | ServerError::Io(_) | ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        tracing::error!(status = %status, error = %self, "request failed");

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
