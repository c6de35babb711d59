//! Orchestrator event system.
//!
//! Implement [`EventHandler`] to watch a run as it happens: turn boundaries, streamed text as
//! it arrives, and how the run ended. This is the "render" hook; the CLI uses it to print the
//! conversation live.
//!
//! The handler is shared as `Arc<dyn EventHandler>` and awaited inline by the orchestrator, so
//! a slow handler slows the run down.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use colloquy::event::{EventHandler, ExperimentEvent};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_experiment_event(&self, event: &ExperimentEvent) {
//!         match event {
//!             ExperimentEvent::TextDelta { content, .. } => print!("{}", content),
//!             ExperimentEvent::TurnCompleted { .. } => println!(),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use crate::session::ConversationMessage;
use async_trait::async_trait;
use uuid::Uuid;

/// Events emitted by [`Orchestrator`](crate::orchestrator::Orchestrator).
///
/// ```text
/// RunStarted
///   └─ TurnStarted { turn: 0, agent: 0 }
///       ├─ TextDelta ...
///       └─ TurnCompleted
///   └─ TurnStarted { turn: 0, agent: 1 }
///   ...
/// RunFinished | RunStopped | RunFailed
/// ```
#[derive(Debug, Clone)]
pub enum ExperimentEvent {
    RunStarted {
        session_id: Uuid,
        num_turns: usize,
        agent_count: usize,
    },
    TurnStarted {
        session_id: Uuid,
        turn: usize,
        agent: usize,
        speaker: String,
    },
    /// A chunk of streamed text for the turn in progress.
    TextDelta {
        session_id: Uuid,
        speaker: String,
        content: String,
    },
    TurnCompleted {
        session_id: Uuid,
        message: ConversationMessage,
    },
    RunFinished {
        session_id: Uuid,
        message_count: usize,
    },
    RunStopped {
        session_id: Uuid,
        message_count: usize,
    },
    RunFailed {
        session_id: Uuid,
        error: String,
    },
}

/// Receives [`ExperimentEvent`]s. The default implementation ignores everything.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_experiment_event(&self, _event: &ExperimentEvent) {}
}
