//! The `OpenAIClient` struct implements `ClientWrapper` for OpenAI's Chat Completions API and
//! for any endpoint that mimics it (vLLM, Ollama, LiteLLM proxies, ...).
//!
//! The request body is built with `openai_rust::chat::ChatArguments`, with the agent's system
//! prompt sent as a leading `system` message. The SDK's own chunk stream is not `Send`, so the
//! streamed response is read here straight off the shared `reqwest` client and decoded with
//! `eventsource-stream`, one [`MessageChunk`] per `chat.completion.chunk` event until `[DONE]`.
//!
//! # Example
//!
//! ```rust,no_run
//! use colloquy::client_wrapper::{ChatRequest, ClientWrapper, Message};
//! use colloquy::clients::openai::OpenAIClient;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
//!     let client = OpenAIClient::new_with_model_string(&key, "gpt-4.1-nano");
//!     let mut chunks = client
//!         .send_message_stream(ChatRequest {
//!             system_prompt: "You are an assistant.".into(),
//!             messages: vec![Message::user("Hello!")],
//!             max_tokens: 1024,
//!         })
//!         .await?;
//!     while let Some(chunk) = chunks.next().await {
//!         print!("{}", chunk?.content);
//!     }
//!     Ok(())
//! }
//! ```

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use serde::Deserialize;

use crate::client_wrapper::{ChatRequest, ClientWrapper, MessageChunk, MessageChunkStream, SendError};
use crate::clients::common::{get_shared_http_client, join_url, StreamError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Client wrapper for OpenAI's Chat Completions API.
pub struct OpenAIClient {
    api_key: String,
    /// Scheme and host; `/v1/chat/completions` is appended.
    base_url: String,
    /// Model name that will be injected into each request.
    model: String,
}

impl OpenAIClient {
    /// Construct a new client using the provided API key and explicit model name.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    /// Construct a client targeting a custom OpenAI compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            api_key: secret_key.to_string(),
            base_url: base_url.to_string(),
            model: model_name.to_string(),
        }
    }
}

/// Convert a [`ChatRequest`] into the message list expected by openai_rust.
fn format_messages(request: &ChatRequest) -> Vec<chat::Message> {
    let mut formatted_messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_prompt.is_empty() {
        formatted_messages.push(chat::Message {
            role: "system".to_owned(),
            content: request.system_prompt.clone(),
        });
    }
    for msg in &request.messages {
        formatted_messages.push(chat::Message {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        });
    }
    formatted_messages
}

/// Build the JSON body for a streamed chat completion.
fn build_request_body(model: &str, request: &ChatRequest) -> Result<serde_json::Value, StreamError> {
    let chat_arguments = chat::ChatArguments::new(model, format_messages(request));
    let mut body = serde_json::to_value(&chat_arguments)
        .map_err(|err| StreamError(format!("failed to encode chat arguments: {}", err)))?;
    if let Some(fields) = body.as_object_mut() {
        fields.insert("max_tokens".into(), request.max_tokens.into());
        fields.insert("stream".into(), true.into());
    }
    Ok(body)
}

#[derive(Deserialize, Debug)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Decode one `data:` payload. `Ok(None)` marks the `[DONE]` sentinel.
fn decode_chunk(data: &str) -> Result<Option<MessageChunk>, StreamError> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let body: ChunkBody = serde_json::from_str(data)
        .map_err(|err| StreamError(format!("Stream chunk error: {}", err)))?;
    let choice = body.choices.into_iter().next();
    let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
    let content = choice.and_then(|c| c.delta.content).unwrap_or_default();
    Ok(Some(MessageChunk {
        content,
        finish_reason,
    }))
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message_stream(
        &self,
        request: ChatRequest,
    ) -> Result<MessageChunkStream, SendError> {
        let body = build_request_body(&self.model, &request).map_err(|err| Box::new(err) as SendError)?;
        let url = join_url(&self.base_url, CHAT_COMPLETIONS_PATH);

        let response = get_shared_http_client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                log::error!(
                    "OpenAIClient::send_message_stream(...): OpenAI API Error: {}",
                    err
                );
                Box::new(err) as SendError
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAIClient::send_message_stream(...): OpenAI API Error {}: {}",
                status,
                text
            );
            return Err(Box::new(StreamError(format!(
                "OpenAI API returned {}: {}",
                status, text
            ))));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let chunks = stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        log::error!("OpenAIClient::send_message_stream(...): SSE Error: {}", err);
                        yield Err(Box::new(StreamError(format!("SSE Error: {}", err))) as SendError);
                        break;
                    }
                };
                match decode_chunk(&event.data) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("OpenAIClient::send_message_stream(...): {}", err);
                        yield Err(Box::new(err) as SendError);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::Message;

    fn request() -> ChatRequest {
        ChatRequest {
            system_prompt: "You are Bob.".into(),
            messages: vec![Message::user("Hello!"), Message::assistant("Hey")],
            max_tokens: 1024,
        }
    }

    #[test]
    fn test_system_prompt_leads_the_message_list() {
        let formatted = format_messages(&request());
        let roles: Vec<&str> = formatted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(formatted[0].content, "You are Bob.");
    }

    #[test]
    fn test_request_body_enables_streaming() {
        let body = build_request_body("gpt-4.1-nano", &request()).unwrap();
        assert_eq!(body["model"], "gpt-4.1-nano");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_decode_chunks() {
        let data = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        assert_eq!(decode_chunk(data).unwrap(), Some(MessageChunk::text("Hi")));

        let data = r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(
            decode_chunk(data).unwrap(),
            Some(MessageChunk {
                content: String::new(),
                finish_reason: Some("stop".into()),
            })
        );

        assert_eq!(decode_chunk("[DONE]").unwrap(), None);
        assert!(decode_chunk("{oops").is_err());
    }
}
