use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{error, info, warn};

use super::error::ApiError;
use super::AppState;

/// Validated body of `POST /api/analyze`.
#[derive(Debug, PartialEq)]
pub struct AnalyzeRequest {
    pub url: String,
    pub github_token: Option<String>,
}

/// Accepts `{url: string, githubToken?: string}`. The body is inspected by
/// hand so that a missing or non-string `url` is a 400, not an extractor
/// rejection.
pub fn parse_analyze_request(body: &[u8]) -> Result<AnalyzeRequest, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;

    let url = value
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing `url`"))?;

    let github_token = value
        .get("githubToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    Ok(AnalyzeRequest {
        url: url.to_string(),
        github_token,
    })
}

/// `POST /api/analyze`
pub(super) async fn handle_analyze(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = parse_analyze_request(&body).inspect_err(|err| {
        warn!(error = %err.message, "/api/analyze rejected request");
    })?;

    match state
        .analyzer
        .analyze(&request.url, request.github_token)
        .await
    {
        Ok(result) => {
            info!(url = %request.url, files = result.file_tree.len(), "/api/analyze ok");
            Ok(Json(&*result).into_response())
        }
        Err(err) => {
            error!(url = %request.url, error = %err, "/api/analyze error");
            Err(ApiError::from(err.as_ref()))
        }
    }
}
