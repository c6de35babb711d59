//! # colloquy
//!
//! colloquy drives turn-based conversations between several LLM personas. It is made of two
//! cooperating pieces:
//!
//! * **Streaming Relay**: [`relay::Relay`] (served over HTTP by [`server`]) takes the current
//!   experiment configuration and conversation state, issues exactly one streaming
//!   chat-completion request to the upstream provider, and re-emits the model's text as
//!   server-sent events (`data: <json>\n\n`).
//! * **Turn Orchestrator**: [`orchestrator::Orchestrator`] owns an
//!   [`session::ExperimentSession`], issues one relay request per turn, consumes the SSE stream,
//!   appends the result to the shared history and schedules the next turn after a fixed delay.
//!
//! Providers sit behind the [`ClientWrapper`] trait. [`clients::claude::ClaudeClient`] speaks
//! the Anthropic Messages API natively; [`clients::openai::OpenAIClient`] covers any
//! OpenAI-compatible chat completions endpoint.
//!
//! ## Running a conversation in-process
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use colloquy::clients::{Provider, ProviderFactory};
//! use colloquy::config::{AgentConfig, ExperimentConfig};
//! use colloquy::orchestrator::Orchestrator;
//! use colloquy::relay::Relay;
//! use colloquy::transport::InProcessTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     colloquy::init_logger();
//!
//!     let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
//!     let factory = Arc::new(ProviderFactory::new(Provider::Anthropic, key));
//!     let relay = Arc::new(Relay::new(factory));
//!
//!     let config = ExperimentConfig::new(
//!         "claude-sonnet-4-5",
//!         2,
//!         vec![
//!             AgentConfig::new("Optimist", "You always see the bright side."),
//!             AgentConfig::new("Skeptic", "You question every claim."),
//!         ],
//!     );
//!
//!     let mut orchestrator = Orchestrator::new(config, Arc::new(InProcessTransport::new(relay)))?;
//!     orchestrator.start().await?;
//!
//!     for message in orchestrator.session().messages() {
//!         println!("[{} t{}]: {}", message.speaker, message.turn, message.content);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding colloquy opt in to `RUST_LOG` driven diagnostics by calling this
/// before anything else; repeated calls are harmless.
///
/// ```rust
/// colloquy::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `colloquy` module.
pub mod colloquy;

// Re-exporting key items for easier external access.
pub use colloquy::client_wrapper;
pub use colloquy::client_wrapper::{
    ChatRequest, ClientFactory, ClientWrapper, Message, MessageChunk, MessageChunkStream, Role,
    SendError,
};
pub use colloquy::clients;
pub use colloquy::config;
pub use colloquy::config::{AgentConfig, ExperimentConfig, RelayConfig};
pub use colloquy::event;
pub use colloquy::event::{EventHandler, ExperimentEvent};
pub use colloquy::history;
pub use colloquy::orchestrator;
pub use colloquy::orchestrator::{Orchestrator, OrchestratorError, StopHandle};
pub use colloquy::relay;
pub use colloquy::relay::{Relay, RelayRequest};
pub use colloquy::server;
pub use colloquy::session;
pub use colloquy::session::{ConversationMessage, ExperimentSession};
pub use colloquy::sse;
pub use colloquy::sse::RelayEvent;
pub use colloquy::transport;
pub use colloquy::turn;
pub use colloquy::turn::TurnPointer;
