use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("embedding backend error: {message}")]
    Embedding { message: String, transient: bool },

    #[error("embedding request timed out after {0:?}")]
    EmbeddingTimeout(std::time::Duration),

    #[error("malformed vector: expected {expected} bytes, got {actual}")]
    Decode { expected: usize, actual: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Failure that will not get better on retry (bad request, bad key).
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding { message: message.into(), transient: false }
    }

    /// Failure worth retrying (network hiccup, 429, 5xx).
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        Self::Embedding { message: message.into(), transient: true }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Embedding { transient, .. } => *transient,
            Self::EmbeddingTimeout(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::Internal(_) | Self::Decode { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Embedding { .. } => StatusCode::BAD_GATEWAY,
            Self::EmbeddingTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl axum::response::IntoResponse for MemoryError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let mut body = serde_json::json!({ "error": self.to_string() });
        if self.is_transient() {
            body["retryable"] = serde_json::Value::Bool(true);
        }
        (status, Json(body)).into_response()
    }
}
