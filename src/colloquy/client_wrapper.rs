use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;

/// A ClientWrapper is a wrapper around a specific cloud LLM service.
/// It provides a common streaming interface so the relay never has to know which vendor
/// it is talking to. It does not keep track of the conversation; the orchestrator owns the
/// history and hands the relevant slice to every request.
// src/client_wrapper

/// Represents the possible roles for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    // set by the developer to steer the model's responses
    System,
    // the message an agent is answering
    User,
    // lets the model know the content was generated as a response to a user message
    Assistant,
}

impl Role {
    /// Wire name used by both Anthropic and OpenAI style APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a provider needs for one streaming completion.
///
/// The system prompt travels separately from `messages` because the Anthropic API takes it as
/// a top-level field; OpenAI-style clients prepend it as a `system` message.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// Represents a chunk of a streaming message response.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageChunk {
    /// The incremental content in this chunk. May be empty for bookkeeping chunks.
    pub content: String,
    /// Set by the provider on the chunk that carries the stop reason.
    pub finish_reason: Option<String>,
}

impl MessageChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
        }
    }
}

/// Type alias for a Send-able error box
pub type SendError = Box<dyn Error + Send + Sync>;

/// Stream of incremental chunks produced by [`ClientWrapper::send_message_stream`].
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, SendError>> + Send>>;

/// Trait defining the interface to interact with various LLM services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Model identifier injected into every request.
    fn model_name(&self) -> &str;

    /// Open a streaming completion.
    ///
    /// Errors returned here happen before any text was produced (bad key, unknown model,
    /// transport failure). Errors that happen mid-stream arrive as `Err` items on the stream.
    async fn send_message_stream(&self, request: ChatRequest)
        -> Result<MessageChunkStream, SendError>;
}

/// Builds a client for the model named in an experiment configuration.
///
/// The relay asks for a fresh client on every request because the model is part of the
/// request body, not of the server configuration.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, model_name: &str) -> Arc<dyn ClientWrapper>;
}
