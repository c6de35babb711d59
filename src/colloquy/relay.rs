//! The streaming relay: one orchestrator request in, one upstream completion out, re-framed as
//! [`RelayEvent`]s.
//!
//! [`Relay::prepare`] does everything that can fail before streaming begins (early exit, config
//! validation, agent lookup) and returns either [`RelayOutcome::Finished`] or a lazily started
//! event stream. The stream opens exactly one upstream call when first polled, yields a
//! `text` event per non-empty chunk, and ends with a single `complete` or `error` event.
//!
//! Per invocation the relay moves `Idle -> Streaming -> {Completed | Errored}`. Cancelling the
//! token passed to `prepare` drops the upstream stream and ends the relay stream without a
//! terminal event.

use crate::client_wrapper::{ChatRequest, ClientFactory, MessageChunkStream, SendError};
use crate::clients::ProviderFactory;
use crate::config::{ConfigError, ExperimentConfig, RelayConfig, DEFAULT_MAX_TOKENS};
use crate::history::{build_upstream_messages, History, HistoryPolicy};
use crate::sse::RelayEvent;
use crate::turn::TurnPointer;
use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Body of `POST /api/experiment/stream`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub config: ExperimentConfig,
    pub current_turn: usize,
    pub current_agent: usize,
    #[serde(default)]
    pub conversation_history: History,
    pub current_message: String,
}

impl RelayRequest {
    pub fn pointer(&self) -> TurnPointer {
        TurnPointer::new(self.current_turn, self.current_agent)
    }
}

/// Failures detected before any event is streamed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid experiment config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("agent index {index} out of range for {count} agents")]
    AgentOutOfRange { index: usize, count: usize },
}

/// Lifecycle of one relay invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Idle => "idle",
            RelayState::Streaming => "streaming",
            RelayState::Completed => "completed",
            RelayState::Errored => "errored",
            RelayState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// What the relay answers with.
pub enum RelayOutcome {
    /// The turn limit was already reached; nothing was sent upstream.
    Finished,
    /// Events for the requested turn.
    Stream(RelayStream),
}

impl fmt::Debug for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::Finished => f.write_str("Finished"),
            RelayOutcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Translates relay requests into upstream calls. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    factory: Arc<dyn ClientFactory>,
    max_tokens: u32,
    history_policy: HistoryPolicy,
}

impl Relay {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            max_tokens: DEFAULT_MAX_TOKENS,
            history_policy: HistoryPolicy::Unbounded,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    /// Relay wired to the provider named in `config`.
    pub fn from_config(config: &RelayConfig) -> Self {
        let mut factory = ProviderFactory::new(config.provider, config.api_key.clone());
        if let Some(url) = &config.base_url {
            factory = factory.with_base_url(url.clone());
        }
        Relay::new(Arc::new(factory))
            .with_max_tokens(config.max_tokens)
            .with_history_policy(HistoryPolicy::from_max_pairs(config.max_history_pairs))
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn history_policy(&self) -> HistoryPolicy {
        self.history_policy
    }

    /// Validate `request` and build its event stream.
    pub fn prepare(
        &self,
        request: RelayRequest,
        cancel: CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let RelayRequest {
            config,
            current_turn,
            current_agent,
            conversation_history,
            current_message,
        } = request;

        if current_turn >= config.num_turns {
            log::debug!(
                "Relay::prepare(...): turn {} >= num_turns {}, already finished",
                current_turn,
                config.num_turns
            );
            return Ok(RelayOutcome::Finished);
        }

        config.validate()?;
        let agent = config
            .agents
            .get(current_agent)
            .cloned()
            .ok_or(RelayError::AgentOutOfRange {
                index: current_agent,
                count: config.agents.len(),
            })?;

        let next = TurnPointer::new(current_turn, current_agent).advance(config.agent_count());
        let finished = next.is_finished(config.num_turns);

        let chat_request = ChatRequest {
            system_prompt: agent.system_prompt,
            messages: build_upstream_messages(
                conversation_history.entries(),
                &current_message,
                self.history_policy,
            ),
            max_tokens: self.max_tokens,
        };
        let client = self.factory.client_for(&config.model_name);
        let speaker = agent.name;

        log_transition(&speaker, current_turn, current_agent, RelayState::Idle);

        let events = stream! {
            log_transition(&speaker, current_turn, current_agent, RelayState::Streaming);

            let opened: Option<Result<MessageChunkStream, SendError>> = tokio::select! {
                _ = cancel.cancelled() => None,
                result = client.send_message_stream(chat_request) => Some(result),
            };
            let mut chunks = match opened {
                None => {
                    log_transition(&speaker, current_turn, current_agent, RelayState::Cancelled);
                    return;
                }
                Some(Err(err)) => {
                    log::error!("Relay: upstream request for {} failed: {}", speaker, err);
                    log_transition(&speaker, current_turn, current_agent, RelayState::Errored);
                    yield RelayEvent::error(err.to_string());
                    return;
                }
                Some(Ok(chunks)) => chunks,
            };

            let mut full_content = String::new();
            loop {
                let next_chunk = tokio::select! {
                    _ = cancel.cancelled() => None,
                    item = chunks.next() => Some(item),
                };
                match next_chunk {
                    None => {
                        log_transition(&speaker, current_turn, current_agent, RelayState::Cancelled);
                        return;
                    }
                    Some(Some(Ok(chunk))) => {
                        if let Some(reason) = &chunk.finish_reason {
                            log::debug!("Relay: {} finished upstream with reason {}", speaker, reason);
                        }
                        if !chunk.content.is_empty() {
                            full_content.push_str(&chunk.content);
                            yield RelayEvent::text(chunk.content, speaker.as_str(), current_turn, current_agent);
                        }
                    }
                    Some(Some(Err(err))) => {
                        log::error!("Relay: upstream stream for {} failed: {}", speaker, err);
                        log_transition(&speaker, current_turn, current_agent, RelayState::Errored);
                        yield RelayEvent::error(err.to_string());
                        return;
                    }
                    Some(None) => break,
                }
            }

            log_transition(&speaker, current_turn, current_agent, RelayState::Completed);
            yield RelayEvent::Complete {
                full_content,
                speaker: speaker.clone(),
                current_turn,
                current_agent,
                next_turn: next.turn,
                next_agent: next.agent,
                finished,
            };
        };

        Ok(RelayOutcome::Stream(Box::pin(events)))
    }
}

fn log_transition(speaker: &str, turn: usize, agent: usize, state: RelayState) {
    log::debug!(
        "Relay: {} (turn {}, agent {}) -> {}",
        speaker,
        turn,
        agent,
        state
    );
}
