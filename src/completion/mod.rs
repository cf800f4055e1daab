pub mod stream;
pub mod types;

pub use stream::TokenStream;
pub use types::{Message, Role};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::OpenAiConfig;
use crate::prompt::ANALYSIS_SYSTEM_PROMPT;
use types::{ChatCompletionsRequest, ChatCompletionsResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("OPENAI_API_KEY is not set and no openai.api_key is configured")]
    MissingApiKey,

    #[error("Completion service error: {status} - {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("Completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Completion request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Completion service returned no content")]
    EmptyResponse,

    #[error("Failed to decode completion stream: {0}")]
    Decode(String),

    #[error("Completion stream failed: {0}")]
    Stream(String),
}

/// A model invocation: which model, how to sample, and the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: Option<f32>,
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Near-deterministic wiki generation for one analysis prompt.
    pub fn analysis(config: &OpenAiConfig, prompt: impl Into<String>) -> Self {
        Self {
            model: config.analysis_model.clone(),
            temperature: Some(config.temperature),
            messages: vec![Message::system(ANALYSIS_SYSTEM_PROMPT), Message::user(prompt)],
        }
    }

    /// Chat turn: the system prompt followed by the replayed history.
    pub fn chat(config: &OpenAiConfig, system: impl Into<String>, history: Vec<Message>) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system));
        messages.extend(history);
        Self {
            model: config.chat_model.clone(),
            temperature: None,
            messages,
        }
    }
}

/// Seam between the pipeline and whatever serves completions.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Wait for the whole completion and return its text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;

    /// Start a completion and hand back its tokens as they arrive.
    ///
    /// Errors that happen before the first token (credentials, HTTP status)
    /// are returned here; later ones arrive through the stream.
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, CompletionError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    idle_timeout: Duration,
    stream_buffer: usize,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(config.timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            stream_buffer: config.stream_buffer,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn post(&self, body: &ChatCompletionsRequest<'_>) -> Result<reqwest::RequestBuilder, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;
        Ok(self.http.post(&self.endpoint).bearer_auth(api_key).json(body))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatCompletionsRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: false,
        };

        let response = self
            .post(&body)?
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        let response = check_status(response).await?;

        let completion = response
            .json::<ChatCompletionsResponse>()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)?;
        debug!(chars = text.len(), "received completion");
        Ok(text)
    }

    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, CompletionError> {
        let body = ChatCompletionsRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: true,
        };

        // Only the wait for response headers is bounded here; the body is
        // bounded chunk by chunk in the relay.
        let pending = self.post(&body)?.send();
        let response = tokio::time::timeout(self.idle_timeout, pending)
            .await
            .map_err(|_| CompletionError::Timeout(self.idle_timeout))?
            .map_err(|e| request_error(e, self.idle_timeout))?;
        let response = check_status(response).await?;
        debug!("completion stream opened");

        Ok(stream::relay(response, self.stream_buffer, self.idle_timeout))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CompletionError::Upstream { status, body })
}

fn request_error(err: reqwest::Error, deadline: Duration) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout(deadline)
    } else {
        CompletionError::Request(err)
    }
}
