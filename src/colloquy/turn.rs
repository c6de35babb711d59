//! Turn/agent advancement.
//!
//! A "turn" is one full pass over the agent list. The agent index cycles modulo the agent
//! count and the turn index increments exactly when that cycle wraps back to zero. Both the
//! relay (to report `nextTurn`/`nextAgent`) and the orchestrator use this single rule.

use serde::{Deserialize, Serialize};

/// `(turn, agent)` position of the conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnPointer {
    pub turn: usize,
    pub agent: usize,
}

impl TurnPointer {
    /// `(0, 0)`, where every run begins.
    pub const START: TurnPointer = TurnPointer { turn: 0, agent: 0 };

    pub fn new(turn: usize, agent: usize) -> Self {
        Self { turn, agent }
    }

    /// The position after this one for a conversation with `agent_count` agents.
    ///
    /// ```rust
    /// use colloquy::TurnPointer;
    ///
    /// assert_eq!(TurnPointer::new(0, 0).advance(2), TurnPointer::new(0, 1));
    /// assert_eq!(TurnPointer::new(0, 1).advance(2), TurnPointer::new(1, 0));
    /// ```
    pub fn advance(self, agent_count: usize) -> Self {
        if agent_count == 0 {
            return Self::new(self.turn + 1, 0);
        }
        let next_agent = (self.agent + 1) % agent_count;
        let next_turn = if self.agent + 1 >= agent_count {
            self.turn + 1
        } else {
            self.turn
        };
        Self::new(next_turn, next_agent)
    }

    /// Terminal condition: the pointer has moved past the last configured turn.
    pub fn is_finished(&self, num_turns: usize) -> bool {
        self.turn >= num_turns
    }
}
