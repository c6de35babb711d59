//! The experiment session: every piece of mutable orchestrator state in one value.
//!
//! State changes only through [`ExperimentSession::apply`], which takes a [`SessionAction`]
//! and performs the matching transition. Updates that arrive after the run stopped, finished
//! or failed are ignored, so a late chunk from an abandoned turn can never leak into the log.

use crate::config::{ExperimentConfig, SEED_MESSAGE};
use crate::history::History;
use crate::turn::TurnPointer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed agent reply. Created on turn completion, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub speaker: String,
    pub content: String,
    pub turn: usize,
    pub agent: usize,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>, pointer: TurnPointer) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
            turn: pointer.turn,
            agent: pointer.agent,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    /// Every configured turn completed.
    Finished,
    /// Stopped by the caller.
    Stopped,
    /// Aborted by a relay or transport error.
    Failed(String),
}

/// Transitions accepted by [`ExperimentSession::apply`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionAction {
    /// Reset everything and begin at `(0, 0)` with the seed message.
    Started,
    /// Append streamed text to the in-progress buffer.
    TextReceived(String),
    /// Record a completed turn and move to `next`.
    TurnCompleted {
        message: ConversationMessage,
        next: TurnPointer,
        finished: bool,
    },
    /// The relay reported the turn limit as already reached.
    AlreadyFinished,
    Failed(String),
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ExperimentSession {
    id: Uuid,
    config: ExperimentConfig,
    messages: Vec<ConversationMessage>,
    pointer: TurnPointer,
    history: History,
    current_message: String,
    streaming_buffer: String,
    status: RunStatus,
}

impl ExperimentSession {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            messages: Vec::new(),
            pointer: TurnPointer::START,
            history: History::new(),
            current_message: SEED_MESSAGE.to_string(),
            streaming_buffer: String::new(),
            status: RunStatus::Idle,
        }
    }

    /// Apply one transition.
    pub fn apply(&mut self, action: SessionAction) {
        match action {
            SessionAction::Started => {
                self.id = Uuid::new_v4();
                self.messages.clear();
                self.history.clear();
                self.pointer = TurnPointer::START;
                self.current_message = SEED_MESSAGE.to_string();
                self.streaming_buffer.clear();
                self.status = RunStatus::Running;
            }
            _ if !self.is_running() => {
                log::debug!("ExperimentSession: ignoring {:?} in status {:?}", action, self.status);
            }
            SessionAction::TextReceived(text) => self.streaming_buffer.push_str(&text),
            SessionAction::TurnCompleted {
                message,
                next,
                finished,
            } => {
                let prompt = std::mem::replace(&mut self.current_message, message.content.clone());
                self.history.append_turn(prompt, message.content.clone());
                self.messages.push(message);
                self.streaming_buffer.clear();
                self.pointer = next;
                if finished {
                    self.status = RunStatus::Finished;
                }
            }
            SessionAction::AlreadyFinished => {
                self.streaming_buffer.clear();
                self.status = RunStatus::Finished;
            }
            SessionAction::Failed(reason) => {
                self.streaming_buffer.clear();
                self.status = RunStatus::Failed(reason);
            }
            SessionAction::Stopped => {
                self.streaming_buffer.clear();
                self.status = RunStatus::Stopped;
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn pointer(&self) -> TurnPointer {
        self.pointer
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// The message the next agent will answer.
    pub fn current_message(&self) -> &str {
        &self.current_message
    }

    /// Text streamed so far for the turn in progress.
    pub fn streaming_buffer(&self) -> &str {
        &self.streaming_buffer
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::Role;
    use crate::config::AgentConfig;

    fn session() -> ExperimentSession {
        ExperimentSession::new(ExperimentConfig::new(
            "m",
            2,
            vec![AgentConfig::new("A", "be A"), AgentConfig::new("B", "be B")],
        ))
    }

    fn complete(session: &mut ExperimentSession, content: &str, finished: bool) {
        let pointer = session.pointer();
        let speaker = session.config().agents[pointer.agent].name.clone();
        session.apply(SessionAction::TurnCompleted {
            message: ConversationMessage::new(speaker, content, pointer),
            next: pointer.advance(2),
            finished,
        });
    }

    #[test]
    fn test_started_resets_state() {
        let mut session = session();
        session.apply(SessionAction::Started);
        complete(&mut session, "one", false);
        session.apply(SessionAction::Stopped);

        let old_id = session.id();
        session.apply(SessionAction::Started);
        assert!(session.is_running());
        assert_ne!(session.id(), old_id);
        assert!(session.messages().is_empty());
        assert!(session.history().is_empty());
        assert_eq!(session.pointer(), TurnPointer::START);
        assert_eq!(session.current_message(), SEED_MESSAGE);
    }

    #[test]
    fn test_turn_completion_extends_history_with_pair() {
        let mut session = session();
        session.apply(SessionAction::Started);
        session.apply(SessionAction::TextReceived("Hi ".into()));
        session.apply(SessionAction::TextReceived("there".into()));
        assert_eq!(session.streaming_buffer(), "Hi there");

        complete(&mut session, "Hi there", false);
        assert_eq!(session.streaming_buffer(), "");
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.pointer(), TurnPointer::new(0, 1));
        assert_eq!(session.current_message(), "Hi there");

        let entries = session.history().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, SEED_MESSAGE);
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].content, "Hi there");

        complete(&mut session, "Reply", false);
        assert_eq!(session.history().len(), 4);
        assert_eq!(session.history().entries()[2].content, "Hi there");
    }

    #[test]
    fn test_finished_flag_ends_run() {
        let mut session = session();
        session.apply(SessionAction::Started);
        complete(&mut session, "last", true);
        assert_eq!(session.status(), &RunStatus::Finished);
        assert!(!session.is_running());
    }

    #[test]
    fn test_updates_after_stop_are_ignored() {
        let mut session = session();
        session.apply(SessionAction::Started);
        session.apply(SessionAction::TextReceived("partial".into()));
        session.apply(SessionAction::Stopped);
        assert_eq!(session.streaming_buffer(), "");

        session.apply(SessionAction::TextReceived("late".into()));
        complete(&mut session, "late", false);
        assert_eq!(session.streaming_buffer(), "");
        assert!(session.messages().is_empty());
        assert_eq!(session.status(), &RunStatus::Stopped);
    }

    #[test]
    fn test_failure_keeps_completed_turns() {
        let mut session = session();
        session.apply(SessionAction::Started);
        complete(&mut session, "kept", false);
        session.apply(SessionAction::Failed("boom".into()));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.status(), &RunStatus::Failed("boom".into()));
    }
}
