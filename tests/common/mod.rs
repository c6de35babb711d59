#![allow(dead_code)]

use async_trait::async_trait;
use colloquy::client_wrapper::{
    ChatRequest, ClientFactory, ClientWrapper, MessageChunk, MessageChunkStream, SendError,
};
use colloquy::config::{AgentConfig, ExperimentConfig};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the mock upstream does on each call. Call `i` (0-based) normally streams
/// `"reply "` then `"{i}"`, so its full text is `"reply {i}"`.
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    Reply,
    /// `send_message_stream` itself fails on this call.
    FailOpenAt(usize),
    /// This call streams one chunk and then an error.
    FailMidStreamAt(usize),
    /// Every call streams one chunk and then never finishes.
    Hang,
}

#[derive(Debug)]
pub struct MockError(pub String);

impl std::fmt::Display for MockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockError {}

pub fn reply_text(call: usize) -> String {
    format!("reply {}", call)
}

struct MockClient {
    model: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

#[async_trait]
impl ClientWrapper for MockClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message_stream(
        &self,
        request: ChatRequest,
    ) -> Result<MessageChunkStream, SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let first: Result<MessageChunk, SendError> = Ok(MessageChunk::text("reply "));
        match self.behavior {
            Behavior::FailOpenAt(n) if n == call => {
                Err(Box::new(MockError(format!("open failed on call {}", call))))
            }
            Behavior::FailMidStreamAt(n) if n == call => {
                let failure: Result<MessageChunk, SendError> =
                    Err(Box::new(MockError("connection reset".into())));
                Ok(Box::pin(stream::iter(vec![first, failure])))
            }
            Behavior::Hang => Ok(Box::pin(
                stream::iter(vec![first]).chain(stream::pending()),
            )),
            _ => {
                let last = Ok(MessageChunk {
                    content: call.to_string(),
                    finish_reason: Some("end_turn".into()),
                });
                Ok(Box::pin(stream::iter(vec![first, last])))
            }
        }
    }
}

/// Factory handing out mock clients that share one call counter and request log.
#[derive(Clone)]
pub struct MockFactory {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ClientFactory for MockFactory {
    fn client_for(&self, model_name: &str) -> Arc<dyn ClientWrapper> {
        Arc::new(MockClient {
            model: model_name.to_string(),
            behavior: self.behavior,
            calls: Arc::clone(&self.calls),
            requests: Arc::clone(&self.requests),
        })
    }
}

pub fn config(num_turns: usize, agent_names: &[&str]) -> ExperimentConfig {
    ExperimentConfig::new(
        "mock-model",
        num_turns,
        agent_names
            .iter()
            .map(|name| AgentConfig::new(*name, format!("You are {}.", name)))
            .collect(),
    )
}
