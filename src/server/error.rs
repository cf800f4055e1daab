use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::analysis::AnalyzeError;
use crate::completion::CompletionError;

/// JSON error body: `{"error": "<message>"}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by a route handler, rendered as a status plus `ErrorBody`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Missing or malformed request input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// Slug, upstream, configuration and completion failures all surface as 500.

impl From<&AnalyzeError> for ApiError {
    fn from(err: &AnalyzeError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GitHubError;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::bad_request("Missing `url`").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Missing `url`"}));
    }

    #[test]
    fn test_invalid_slug_maps_to_500() {
        let err = AnalyzeError::GitHub(GitHubError::InvalidSlug("x".to_string()));
        let api = ApiError::from(&err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.message.contains("Invalid GitHub repository reference"));
    }

    #[test]
    fn test_missing_key_maps_to_500() {
        let api = ApiError::from(CompletionError::MissingApiKey);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.message.contains("OPENAI_API_KEY"));
    }
}
