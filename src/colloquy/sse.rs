//! Relay stream events and their Server-Sent Events framing.
//!
//! Every event travels as one frame `data: <json>\n\n`. The JSON object carries a `type`
//! discriminator (`text`, `complete`, `error`) and camelCase field names.
//!
//! [`SseLineDecoder`] is the client half: it accepts arbitrary byte chunks (a frame, or even a
//! multi-byte UTF-8 character, may be split across network reads), buffers incomplete lines,
//! and yields each parsed event once its line is complete. Lines that are not `data:` lines or
//! that fail to parse are logged and skipped.

use serde::{Deserialize, Serialize};

/// One event of a relay stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    /// Incremental text from the upstream model.
    #[serde(rename_all = "camelCase")]
    Text {
        content: String,
        speaker: String,
        current_turn: usize,
        current_agent: usize,
        finished: bool,
    },
    /// Final event of a successful turn.
    #[serde(rename_all = "camelCase")]
    Complete {
        full_content: String,
        speaker: String,
        current_turn: usize,
        current_agent: usize,
        next_turn: usize,
        next_agent: usize,
        finished: bool,
    },
    /// Upstream failure after the stream started.
    Error { error: String, finished: bool },
}

impl RelayEvent {
    pub fn text(content: impl Into<String>, speaker: impl Into<String>, turn: usize, agent: usize) -> Self {
        RelayEvent::Text {
            content: content.into(),
            speaker: speaker.into(),
            current_turn: turn,
            current_agent: agent,
            finished: false,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        RelayEvent::Error {
            error: error.into(),
            finished: true,
        }
    }

    /// `true` for `complete` and `error`, the two events that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Complete { .. } | RelayEvent::Error { .. })
    }
}

/// Encode `event` as a full SSE frame.
pub fn encode_frame(event: &RelayEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Incremental decoder for a byte stream of SSE frames.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<RelayEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if let Some(event) = Self::parse_line(&self.pending[start..end]) {
                events.push(event);
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        events
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<RelayEvent> {
        if self.pending.is_empty() {
            return None;
        }
        self.scanned = 0;
        let line = std::mem::take(&mut self.pending);
        Self::parse_line(&line)
    }

    fn parse_line(line: &[u8]) -> Option<RelayEvent> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("SseLineDecoder: skipping non UTF-8 line: {}", err);
                return None;
            }
        };
        let payload = text.strip_prefix("data:")?.trim_start();
        if payload.is_empty() {
            return None;
        }
        match serde_json::from_str::<RelayEvent>(payload) {
            Ok(event) => Some(event),
            Err(err) => {
                log::warn!("SseLineDecoder: skipping malformed event {:?}: {}", payload, err);
                None
            }
        }
    }
}
