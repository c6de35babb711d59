//! The turn orchestrator.
//!
//! [`Orchestrator::start`] drives a whole conversation: it resets the session, sends the seed
//! message to agent 0 of turn 0, and then repeatedly
//!
//! 1. submits the current turn through its [`TurnTransport`],
//! 2. folds `text` events into the session's streaming buffer,
//! 3. on `complete`, records the [`ConversationMessage`], extends history with the
//!    user/assistant pair and moves to the relay-reported `nextTurn`/`nextAgent`,
//! 4. waits the turn delay (1 s by default) and goes again,
//!
//! until the relay reports `finished`, an `error` event arrives, or the run is stopped.
//! Exactly one turn is in flight at any time.
//!
//! Stopping goes through a [`StopHandle`]. It cancels a token that covers the inter-turn
//! delay, the relay request and (for in-process relays) the upstream stream, so in-flight
//! work is abandoned rather than merely ignored.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use colloquy::config::{AgentConfig, ExperimentConfig};
//! use colloquy::orchestrator::Orchestrator;
//! use colloquy::transport::HttpTransport;
//!
//! # async fn run() -> Result<(), colloquy::OrchestratorError> {
//! let config = ExperimentConfig::new(
//!     "claude-haiku-4-5",
//!     3,
//!     vec![AgentConfig::new("Ada", "You are Ada."), AgentConfig::new("Bo", "You are Bo.")],
//! );
//! let transport = Arc::new(HttpTransport::new("http://127.0.0.1:3000/api/experiment/stream"));
//! let mut orchestrator = Orchestrator::new(config, transport)?
//!     .with_turn_delay(Duration::from_millis(250));
//!
//! let stop = orchestrator.stop_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     stop.stop();
//! });
//!
//! orchestrator.start().await?;
//! println!("{} messages", orchestrator.session().messages().len());
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, ExperimentConfig};
use crate::event::{EventHandler, ExperimentEvent};
use crate::relay::{RelayError, RelayRequest};
use crate::session::{ConversationMessage, ExperimentSession, RunStatus, SessionAction};
use crate::sse::RelayEvent;
use crate::transport::{TurnResponse, TurnTransport};
use crate::turn::TurnPointer;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Pause between a completed turn and the next request.
pub const DEFAULT_TURN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid experiment config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay answered with status {status}: {body}")]
    RelayStatus { status: u16, body: String },
    #[error("unexpected relay response: {0}")]
    UnexpectedResponse(String),
    #[error("relay rejected the turn: {0}")]
    Relay(#[from] RelayError),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("relay stream ended without a complete event")]
    StreamEnded,
    #[error("turn cancelled")]
    Cancelled,
}

/// Cancels the run of the [`Orchestrator`] it was taken from. Cloneable and `Send`, so it can
/// be moved into a signal handler or another task.
///
/// A stop that lands while no run is in progress, or after the last turn of a run completed,
/// is kept and ends the next [`Orchestrator::start`] before it sends anything.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.lock().cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.current().is_cancelled()
    }

    /// Token of the run in progress, or of the next run.
    pub fn token(&self) -> CancellationToken {
        self.current()
    }

    /// Called when a run ends. A pending stop survives unless the run `consumed` it.
    fn rearm(&self, consumed: bool) {
        let mut guard = self.lock();
        if consumed || !guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
    }

    fn current(&self) -> CancellationToken {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Result of a single [`Orchestrator::run_turn`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn completed; this is where the conversation continues.
    Next(TurnPointer),
    /// Every configured turn has completed.
    Finished,
    /// The run was stopped before the turn completed.
    Stopped,
}

pub struct Orchestrator {
    session: ExperimentSession,
    transport: Arc<dyn TurnTransport>,
    turn_delay: Duration,
    event_handler: Option<Arc<dyn EventHandler>>,
    stop: StopHandle,
}

impl Orchestrator {
    /// Validates `config`; the session starts idle.
    pub fn new(
        config: ExperimentConfig,
        transport: Arc<dyn TurnTransport>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            session: ExperimentSession::new(config),
            transport,
            turn_delay: DEFAULT_TURN_DELAY,
            event_handler: None,
            stop: StopHandle::default(),
        })
    }

    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the current run, or the next one when none is in progress. Equivalent to
    /// `stop_handle().stop()`.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn session(&self) -> &ExperimentSession {
        &self.session
    }

    /// Run the conversation from the beginning.
    ///
    /// Returns `Ok(())` when every turn completed or the run was stopped (check
    /// [`ExperimentSession::status`] to tell which). Returns the error that ended the run
    /// otherwise; turns completed before the error stay in the session.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        let cancel = self.stop.token();
        let result = self.run_from_start(&cancel).await;
        self.stop.rearm(self.session.status() == &RunStatus::Stopped);
        result
    }

    async fn run_from_start(&mut self, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        self.session.apply(SessionAction::Started);

        let config = self.session.config();
        log::info!(
            "Orchestrator::start(): session {} with {} agents over {} turns",
            self.session.id(),
            config.agent_count(),
            config.num_turns
        );
        self.emit(ExperimentEvent::RunStarted {
            session_id: self.session.id(),
            num_turns: config.num_turns,
            agent_count: config.agent_count(),
        })
        .await;

        let mut pointer = TurnPointer::START;
        loop {
            match self.run_turn(pointer, cancel).await? {
                TurnOutcome::Next(next) => {
                    pointer = next;
                    let slept = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(self.turn_delay) => true,
                    };
                    if !slept {
                        self.mark_stopped().await;
                        return Ok(());
                    }
                }
                TurnOutcome::Finished => {
                    log::info!(
                        "Orchestrator::start(): session {} finished with {} messages",
                        self.session.id(),
                        self.session.messages().len()
                    );
                    self.emit(ExperimentEvent::RunFinished {
                        session_id: self.session.id(),
                        message_count: self.session.messages().len(),
                    })
                    .await;
                    return Ok(());
                }
                TurnOutcome::Stopped => return Ok(()),
            }
        }
    }

    /// Run exactly one turn at `pointer` using the session's history and current message.
    pub async fn run_turn(
        &mut self,
        pointer: TurnPointer,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let num_turns = self.session.config().num_turns;
        if pointer.is_finished(num_turns) {
            self.session.apply(SessionAction::AlreadyFinished);
            return Ok(TurnOutcome::Finished);
        }
        if !self.session.is_running() || cancel.is_cancelled() {
            return Ok(self.mark_stopped().await);
        }

        let request = RelayRequest {
            config: self.session.config().clone(),
            current_turn: pointer.turn,
            current_agent: pointer.agent,
            conversation_history: self.session.history().clone(),
            current_message: self.session.current_message().to_string(),
        };
        let speaker = self
            .session
            .config()
            .agents
            .get(pointer.agent)
            .map(|agent| agent.name.clone())
            .unwrap_or_default();
        log::debug!(
            "Orchestrator::run_turn(...): turn {} agent {} ({})",
            pointer.turn,
            pointer.agent,
            speaker
        );
        self.emit(ExperimentEvent::TurnStarted {
            session_id: self.session.id(),
            turn: pointer.turn,
            agent: pointer.agent,
            speaker,
        })
        .await;

        let transport = Arc::clone(&self.transport);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = transport.open_turn(request, cancel.clone()) => Some(response),
        };
        let mut events = match opened {
            None | Some(Err(OrchestratorError::Cancelled)) => {
                return Ok(self.mark_stopped().await)
            }
            Some(Err(err)) => return Err(self.fail(err).await),
            Some(Ok(TurnResponse::Finished)) => {
                self.session.apply(SessionAction::AlreadyFinished);
                return Ok(TurnOutcome::Finished);
            }
            Some(Ok(TurnResponse::Events(events))) => events,
        };

        loop {
            let next_event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = events.next() => Some(event),
            };
            let event = match next_event {
                None | Some(Some(Err(OrchestratorError::Cancelled))) => {
                    return Ok(self.mark_stopped().await)
                }
                Some(None) if cancel.is_cancelled() => return Ok(self.mark_stopped().await),
                Some(None) => return Err(self.fail(OrchestratorError::StreamEnded).await),
                Some(Some(Err(err))) => return Err(self.fail(err).await),
                Some(Some(Ok(event))) => event,
            };

            match event {
                RelayEvent::Text {
                    content, speaker, ..
                } => {
                    self.session
                        .apply(SessionAction::TextReceived(content.clone()));
                    self.emit(ExperimentEvent::TextDelta {
                        session_id: self.session.id(),
                        speaker,
                        content,
                    })
                    .await;
                }
                RelayEvent::Complete {
                    full_content,
                    speaker,
                    current_turn,
                    current_agent,
                    next_turn,
                    next_agent,
                    finished,
                } => {
                    let message = ConversationMessage::new(
                        speaker,
                        full_content,
                        TurnPointer::new(current_turn, current_agent),
                    );
                    let next = TurnPointer::new(next_turn, next_agent);
                    self.session.apply(SessionAction::TurnCompleted {
                        message: message.clone(),
                        next,
                        finished,
                    });
                    self.emit(ExperimentEvent::TurnCompleted {
                        session_id: self.session.id(),
                        message,
                    })
                    .await;
                    return Ok(if finished {
                        TurnOutcome::Finished
                    } else {
                        TurnOutcome::Next(next)
                    });
                }
                RelayEvent::Error { error, .. } => {
                    return Err(self.fail(OrchestratorError::Upstream(error)).await);
                }
            }
        }
    }

    async fn mark_stopped(&mut self) -> TurnOutcome {
        if self.session.is_running() {
            log::info!(
                "Orchestrator: session {} stopped after {} messages",
                self.session.id(),
                self.session.messages().len()
            );
            self.session.apply(SessionAction::Stopped);
            self.emit(ExperimentEvent::RunStopped {
                session_id: self.session.id(),
                message_count: self.session.messages().len(),
            })
            .await;
        }
        TurnOutcome::Stopped
    }

    async fn fail(&mut self, err: OrchestratorError) -> OrchestratorError {
        log::error!("Orchestrator: session {} failed: {}", self.session.id(), err);
        self.session.apply(SessionAction::Failed(err.to_string()));
        self.emit(ExperimentEvent::RunFailed {
            session_id: self.session.id(),
            error: err.to_string(),
        })
        .await;
        err
    }

    async fn emit(&self, event: ExperimentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_experiment_event(&event).await;
        }
    }
}
