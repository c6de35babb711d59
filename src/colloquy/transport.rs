//! How the orchestrator reaches a relay.
//!
//! [`HttpTransport`] POSTs to a running relay server and decodes its SSE body incrementally.
//! [`InProcessTransport`] calls a [`Relay`] directly and skips HTTP entirely, which is what the
//! CLI's `--direct` mode and most tests use.

use crate::clients::common::get_shared_http_client;
use crate::orchestrator::OrchestratorError;
use crate::relay::{Relay, RelayOutcome, RelayRequest};
use crate::sse::{RelayEvent, SseLineDecoder};
use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<RelayEvent, OrchestratorError>> + Send>>;

/// Relay answer to one turn request.
pub enum TurnResponse {
    /// `{finished: true}`: the turn limit was already reached.
    Finished,
    Events(EventStream),
}

#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// Submit one turn. Once `cancel` fires, implementations stop waiting and end the
    /// returned stream; dropping the stream abandons the turn as well.
    async fn open_turn(
        &self,
        request: RelayRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse, OrchestratorError>;
}

/// Talks to a relay server over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// `url` is the full endpoint, e.g. `http://127.0.0.1:3000/api/experiment/stream`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: get_shared_http_client().clone(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TurnTransport for HttpTransport {
    async fn open_turn(
        &self,
        request: RelayRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse, OrchestratorError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            response = self.client.post(&self.url).json(&request).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = until_cancelled(&cancel, response.text()).await?.unwrap_or_default();
            return Err(OrchestratorError::RelayStatus {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_event_stream {
            let body = until_cancelled(&cancel, response.text()).await??;
            let finished = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| value.get("finished").and_then(|f| f.as_bool()))
                .unwrap_or(false);
            return if finished {
                Ok(TurnResponse::Finished)
            } else {
                Err(OrchestratorError::UnexpectedResponse(body))
            };
        }

        let mut bytes = response.bytes_stream();
        let events = stream! {
            let mut decoder = SseLineDecoder::new();
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    chunk = bytes.next() => Some(chunk),
                };
                match chunk {
                    // Cancelled: end without flushing a partial frame.
                    None => return,
                    Some(None) => break,
                    Some(Some(Ok(chunk))) => {
                        for event in decoder.push(&chunk) {
                            yield Ok(event);
                        }
                    }
                    Some(Some(Err(err))) => {
                        yield Err(OrchestratorError::from(err));
                        return;
                    }
                }
            }
            if let Some(event) = decoder.finish() {
                yield Ok(event);
            }
        };
        Ok(TurnResponse::Events(Box::pin(events)))
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = T>,
) -> Result<T, OrchestratorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        output = work => Ok(output),
    }
}

/// Calls a [`Relay`] in the same process.
#[derive(Clone)]
pub struct InProcessTransport {
    relay: Arc<Relay>,
}

impl InProcessTransport {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl TurnTransport for InProcessTransport {
    async fn open_turn(
        &self,
        request: RelayRequest,
        cancel: CancellationToken,
    ) -> Result<TurnResponse, OrchestratorError> {
        match self.relay.prepare(request, cancel.child_token())? {
            RelayOutcome::Finished => Ok(TurnResponse::Finished),
            RelayOutcome::Stream(events) => Ok(TurnResponse::Events(Box::pin(
                events.map(Ok::<RelayEvent, OrchestratorError>),
            ))),
        }
    }
}
