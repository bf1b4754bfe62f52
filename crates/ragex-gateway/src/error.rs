use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ragex_index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Handler failure rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        let status = if matches!(e, IndexError::EmptyQuery) {
            StatusCode::BAD_REQUEST
        } else if e.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use ragex_store::VectorStoreError;

    use super::*;

    #[test]
    fn index_errors_map_to_status() {
        assert_eq!(
            ApiError::from(IndexError::EmptyQuery).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IndexError::Store(VectorStoreError::Connection("refused".into())))
                .status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(IndexError::Store(VectorStoreError::CollectionNotFound(
                "code".into()
            )))
            .status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
