//! Streaming completions: the bounded channel that carries tokens from the
//! upstream event stream to the consumer.

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::{pin, Pin};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

use super::types::StreamChunk;
use super::CompletionError;

const DONE_SENTINEL: &str = "[DONE]";

pub type TokenSender = mpsc::Sender<Result<String, CompletionError>>;

/// Incremental assistant output. Ends when the upstream completion finishes
/// or after the first error.
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String, CompletionError>>,
}

impl TokenStream {
    /// A stream fed through a channel holding at most `capacity` tokens.
    /// The producer waits whenever the consumer falls behind.
    pub fn channel(capacity: usize) -> (TokenSender, TokenStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, TokenStream { receiver: rx })
    }
}

impl Stream for TokenStream {
    type Item = Result<String, CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Extract the text delta of one chunk; `None` for role-only or empty deltas.
pub fn parse_token(payload: &str) -> Result<Option<String>, CompletionError> {
    let chunk: StreamChunk =
        serde_json::from_str(payload).map_err(|e| CompletionError::Decode(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(CompletionError::Stream(error.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// Spawn the producer that reads `response` as server-sent events and feeds
/// a bounded channel.
///
/// The producer stops as soon as the consumer is dropped, when the upstream
/// goes quiet for longer than `idle_timeout`, on `data: [DONE]`, or on the
/// first error.
pub(crate) fn relay(
    response: reqwest::Response,
    capacity: usize,
    idle_timeout: Duration,
) -> TokenStream {
    let (tx, tokens) = TokenStream::channel(capacity);

    tokio::spawn(
        async move {
            let mut events = pin!(response.bytes_stream().eventsource());
            let mut forwarded = 0usize;

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(forwarded, "stream consumer went away, dropping upstream");
                        return;
                    }
                    next = tokio::time::timeout(idle_timeout, events.next()) => next,
                };

                let event = match next {
                    Err(_) => {
                        let _ = tx.send(Err(CompletionError::Timeout(idle_timeout))).await;
                        return;
                    }
                    Ok(None) => {
                        debug!(forwarded, "upstream closed the event stream");
                        return;
                    }
                    Ok(Some(Err(EventStreamError::Transport(err)))) => {
                        let _ = tx.send(Err(CompletionError::Request(err))).await;
                        return;
                    }
                    Ok(Some(Err(err))) => {
                        let _ = tx.send(Err(CompletionError::Decode(err.to_string()))).await;
                        return;
                    }
                    Ok(Some(Ok(event))) => event,
                };

                if event.data == DONE_SENTINEL {
                    debug!(forwarded, "upstream completion finished");
                    return;
                }
                if event.data.is_empty() {
                    continue;
                }

                match parse_token(&event.data) {
                    Ok(Some(token)) => {
                        if tx.send(Ok(token)).await.is_err() {
                            debug!(forwarded, "stream consumer went away, dropping upstream");
                            return;
                        }
                        forwarded += 1;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        }
        .in_current_span(),
    );

    tokens
}
