//! Conversation history fed back to the upstream model.
//!
//! Every completed turn appends exactly two entries: a `user` entry holding the message the
//! agent answered (the previous agent's output, or the seed greeting for the first turn) and
//! an `assistant` entry holding the agent's reply.
//!
//! The relay encodes history one way only: the role-tagged entries are forwarded as-is and the
//! message being answered is appended as a final `user` message. Flattening history into a
//! single stringified prompt is not supported.
//!
//! History grows without bound by default. [`HistoryPolicy::SlidingWindow`] caps what is sent
//! upstream; the orchestrator always keeps the full record.

use crate::client_wrapper::{Message, Role};
use serde::{Deserialize, Serialize};

/// `{role, content}` pair as it appears on the wire.
pub type HistoryEntry = Message;

/// Append-only list of [`HistoryEntry`] values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed turn: what the agent was told, then what it said.
    pub fn append_turn(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.entries.push(Message::user(prompt));
        self.entries.push(Message::assistant(reply));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl From<Vec<HistoryEntry>> for History {
    fn from(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }
}

/// How much history the relay forwards upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryPolicy {
    /// Forward everything.
    #[default]
    Unbounded,
    /// Forward only the most recent `max_pairs` user/assistant pairs.
    SlidingWindow { max_pairs: usize },
}

impl HistoryPolicy {
    pub fn from_max_pairs(max_pairs: Option<usize>) -> Self {
        match max_pairs {
            Some(max_pairs) => HistoryPolicy::SlidingWindow { max_pairs },
            None => HistoryPolicy::Unbounded,
        }
    }

    /// Slice of `entries` to forward. The window always begins on a `user` entry so the
    /// upstream conversation keeps alternating correctly.
    pub fn window<'a>(&self, entries: &'a [HistoryEntry]) -> &'a [HistoryEntry] {
        match *self {
            HistoryPolicy::Unbounded => entries,
            HistoryPolicy::SlidingWindow { max_pairs } => {
                let mut start = entries.len().saturating_sub(max_pairs.saturating_mul(2));
                while start < entries.len() && entries[start].role != Role::User {
                    start += 1;
                }
                &entries[start..]
            }
        }
    }
}

/// Build the upstream message list: windowed history followed by the message being answered.
pub fn build_upstream_messages(
    history: &[HistoryEntry],
    current_message: &str,
    policy: HistoryPolicy,
) -> Vec<Message> {
    let window = policy.window(history);
    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.extend(window.iter().filter(|m| m.role != Role::System).cloned());
    messages.push(Message::user(current_message));
    messages
}
