//! `POST /api/chat`: relays a streamed completion to the HTTP response.
//!
//! The conversation history is owned by the client and replayed in full on
//! every request; nothing is stored server-side.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::future;
use tracing::{debug, error, info, warn};

use super::error::ApiError;
use super::AppState;
use crate::analysis::Analyzer;
use crate::completion::{CompletionRequest, Message, Role, TokenStream};
use crate::prompt;

const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");
const FINISH_FRAME: &str = "d:{\"finishReason\":\"stop\"}\n";

/// A message as sent by chat UIs: `content` may be a string or a list of
/// parts, and some clients send the parts separately.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ChatMessage {
    /// String content if present and non-empty, else every text part joined.
    pub fn text(&self) -> String {
        if let Some(MessageContent::Text(text)) = &self.content {
            if !text.is_empty() {
                return text.clone();
            }
        }

        let content_parts: &[MessagePart] = match &self.content {
            Some(MessageContent::Parts(parts)) => parts.as_slice(),
            _ => &[],
        };
        content_parts
            .iter()
            .chain(&self.parts)
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Other => None,
            })
            .collect()
    }
}

impl From<&ChatMessage> for Message {
    fn from(message: &ChatMessage) -> Self {
        Message::new(message.role, message.text())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Response framing selected with `?protocol=`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// AI SDK data stream lines, what `useChat` clients read
    #[default]
    Data,
    /// Bare token text
    Text,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub protocol: StreamProtocol,
}

pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;

    if !value.get("messages").is_some_and(Value::is_array) {
        return Err(ApiError::bad_request("Missing `messages`"));
    }

    serde_json::from_value(value)
        .map_err(|e| ApiError::bad_request(format!("Invalid chat request: {e}")))
}

/// Explicit `system` first, then the cached analysis for `url`, then the
/// default assistant prompt.
fn resolve_system_prompt(analyzer: &Analyzer, request: &ChatRequest) -> String {
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        return system.to_string();
    }

    let cached = request
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .and_then(|url| analyzer.cached(url));
    match cached {
        Some(result) => {
            debug!(repo = %result.repo, "grounding chat in cached analysis");
            prompt::chat_system_prompt(&result.analysis, &result.file_tree)
        }
        None => prompt::DEFAULT_CHAT_SYSTEM_PROMPT.to_string(),
    }
}

/// `POST /api/chat`
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = parse_chat_request(&body).inspect_err(|err| {
        warn!(error = %err.message, "/api/chat rejected request");
    })?;

    let system = resolve_system_prompt(&state.analyzer, &request);
    let history: Vec<Message> = request.messages.iter().map(Message::from).collect();
    let completion = CompletionRequest::chat(state.analyzer.openai_config(), system, history);

    let tokens = state
        .analyzer
        .completion()
        .stream(completion)
        .await
        .map_err(|err| {
            error!(error = %err, "/api/chat error");
            ApiError::from(err)
        })?;

    info!(messages = request.messages.len(), protocol = ?query.protocol, "/api/chat streaming");
    Ok(match query.protocol {
        StreamProtocol::Text => text_response(tokens),
        StreamProtocol::Data => data_response(tokens),
    })
}

fn text_response(tokens: TokenStream) -> Response {
    let body = Body::from_stream(text_frames(tokens));
    (
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}

fn data_response(tokens: TokenStream) -> Response {
    let body = Body::from_stream(data_frames(tokens));
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (DATA_STREAM_HEADER, HeaderValue::from_static("v1")),
        ],
        body,
    )
        .into_response()
}

/// Raw tokens, ending quietly at the first error.
fn text_frames(tokens: TokenStream) -> impl Stream<Item = Result<String, Infallible>> + Send {
    tokens.scan((), |_, item| {
        future::ready(match item {
            Ok(token) => Some(Ok(token)),
            Err(err) => {
                error!(error = %err, "chat stream ended early");
                None
            }
        })
    })
}

/// `0:` token lines, a `3:` line on error, and a `d:` finish line after a
/// clean end.
fn data_frames(tokens: TokenStream) -> impl Stream<Item = Result<String, Infallible>> + Send {
    stream::unfold(Some(tokens), |state| async move {
        let mut tokens = state?;
        let frame = match tokens.next().await {
            Some(Ok(token)) => return Some((token_frame(&token), Some(tokens))),
            Some(Err(err)) => {
                error!(error = %err, "chat stream ended early");
                error_frame(&err.to_string())
            }
            None => FINISH_FRAME.to_string(),
        };
        Some((frame, None))
    })
    .map(Ok)
}

fn token_frame(token: &str) -> String {
    format!("0:{}\n", Value::String(token.to_string()))
}

fn error_frame(message: &str) -> String {
    format!("3:{}\n", Value::String(message.to_string()))
}
