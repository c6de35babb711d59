//! Anthropic Claude client speaking the native Messages API.
//!
//! Every call is a single `POST /v1/messages` with `"stream": true`. The response is a
//! server-sent event stream whose events are decoded as they arrive:
//!
//! | Anthropic event        | Result                                           |
//! |------------------------|--------------------------------------------------|
//! | `content_block_delta`  | `MessageChunk` carrying the text delta           |
//! | `message_delta`        | `MessageChunk` with `finish_reason` = stop reason |
//! | `message_stop`         | end of the chunk stream                          |
//! | `error`                | `Err` item, stream closed                        |
//! | anything else / `ping` | ignored                                          |
//!
//! # Example
//!
//! ```rust,no_run
//! use colloquy::client_wrapper::{ChatRequest, ClientWrapper, Message};
//! use colloquy::clients::claude::{ClaudeClient, Model};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
//!     let client = ClaudeClient::new_with_model_enum(&key, Model::ClaudeHaiku45);
//!     let mut chunks = client
//!         .send_message_stream(ChatRequest {
//!             system_prompt: "You are terse.".into(),
//!             messages: vec![Message::user("List three Claude capabilities.")],
//!             max_tokens: 1024,
//!         })
//!         .await?;
//!     while let Some(chunk) = chunks.next().await {
//!         print!("{}", chunk?.content);
//!     }
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{
    ChatRequest, ClientWrapper, MessageChunk, MessageChunkStream, SendError,
};
use crate::clients::common::{get_shared_http_client, join_url, StreamError};
use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client wrapper for Anthropic's Messages API.
pub struct ClaudeClient {
    api_key: String,
    base_url: String,
    /// Exposed model name.
    model: String,
}

/// Anthropic Claude models with stable aliases.
pub enum Model {
    /// `claude-opus-4-1` – most capable reasoning tier.
    ClaudeOpus41,
    /// `claude-sonnet-4-5` – balanced reasoning + throughput.
    ClaudeSonnet45,
    /// `claude-haiku-4-5` – fastest tier.
    ClaudeHaiku45,
    /// `claude-3-5-haiku-latest` – previous generation fast tier.
    ClaudeHaiku35,
}

/// Convert a [`Model`] variant into its public string identifier.
fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeOpus41 => "claude-opus-4-1".to_string(),
        Model::ClaudeSonnet45 => "claude-sonnet-4-5".to_string(),
        Model::ClaudeHaiku45 => "claude-haiku-4-5".to_string(),
        Model::ClaudeHaiku35 => "claude-3-5-haiku-latest".to_string(),
    }
}

impl ClaudeClient {
    /// Create a client from an API key and strongly typed model variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_str(secret_key, &model_to_string(model))
    }

    /// Create a client from an API key and explicit model string.
    pub fn new_with_model_str(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    /// Create a client pointing at a custom Claude-compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        ClaudeClient {
            api_key: secret_key.to_string(),
            base_url: base_url.to_string(),
            model: model_name.to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

/// Build the JSON body for `POST /v1/messages`.
fn build_request_body(model: &str, request: &ChatRequest) -> Result<serde_json::Value, StreamError> {
    let body = MessagesRequest {
        model,
        max_tokens: request.max_tokens,
        system: Some(request.system_prompt.as_str()).filter(|s| !s.is_empty()),
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        stream: true,
    };
    serde_json::to_value(&body)
        .map_err(|err| StreamError(format!("failed to encode messages request: {}", err)))
}

#[derive(Deserialize, Debug)]
struct ContentBlockDelta {
    delta: Delta,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDelta {
    delta: MessageDeltaBody,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEvent {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// What a single upstream SSE event means for the chunk stream.
#[derive(Debug, PartialEq)]
enum StreamStep {
    Chunk(MessageChunk),
    Skip,
    Stop,
}

/// Decode one Anthropic SSE event. Undecodable `content_block_delta` payloads are logged and
/// skipped; an `error` event becomes an `Err`.
fn decode_stream_event(event_type: &str, data: &str) -> Result<StreamStep, StreamError> {
    match event_type {
        "content_block_delta" => match serde_json::from_str::<ContentBlockDelta>(data) {
            Ok(ContentBlockDelta {
                delta: Delta::TextDelta { text },
            }) => Ok(StreamStep::Chunk(MessageChunk::text(text))),
            Ok(_) => Ok(StreamStep::Skip),
            Err(err) => {
                log::warn!(
                    "ClaudeClient::decode_stream_event(...): SSE Parsing Error: {}, data: {}",
                    err,
                    data
                );
                Ok(StreamStep::Skip)
            }
        },
        "message_delta" => match serde_json::from_str::<MessageDelta>(data) {
            Ok(delta) => Ok(StreamStep::Chunk(MessageChunk {
                content: String::new(),
                finish_reason: delta.delta.stop_reason,
            })),
            Err(_) => Ok(StreamStep::Skip),
        },
        "message_stop" => Ok(StreamStep::Stop),
        "error" => match serde_json::from_str::<ErrorEvent>(data) {
            Ok(event) => Err(StreamError(format!(
                "{}: {}",
                event.error.kind, event.error.message
            ))),
            Err(_) => Err(StreamError(format!("upstream error: {}", data))),
        },
        _ => Ok(StreamStep::Skip),
    }
}

#[async_trait]
impl ClientWrapper for ClaudeClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message_stream(
        &self,
        request: ChatRequest,
    ) -> Result<MessageChunkStream, SendError> {
        let url = join_url(&self.base_url, "messages");
        let body = build_request_body(&self.model, &request).map_err(|err| Box::new(err) as SendError)?;

        log::debug!(
            "ClaudeClient::send_message_stream(...): model={} messages={} max_tokens={}",
            self.model,
            request.messages.len(),
            request.max_tokens
        );

        let response = get_shared_http_client()
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                log::error!(
                    "ClaudeClient::send_message_stream(...): transport error: {}",
                    err
                );
                Box::new(err) as SendError
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!(
                "ClaudeClient::send_message_stream(...): Anthropic API Error {}: {}",
                status,
                text
            );
            return Err(Box::new(StreamError(format!(
                "Anthropic API returned {}: {}",
                status, text
            ))));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let chunks = stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        log::error!("ClaudeClient::send_message_stream(...): SSE Error: {}", err);
                        yield Err(Box::new(StreamError(format!("SSE Error: {}", err))) as SendError);
                        break;
                    }
                };
                log::trace!("Anthropic SSE: [{}] {}", event.event, event.data);
                match decode_stream_event(&event.event, &event.data) {
                    Ok(StreamStep::Chunk(chunk)) => yield Ok(chunk),
                    Ok(StreamStep::Skip) => {}
                    Ok(StreamStep::Stop) => break,
                    Err(err) => {
                        log::error!("ClaudeClient::send_message_stream(...): {}", err);
                        yield Err(Box::new(err) as SendError);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(chunks))
    }
}
