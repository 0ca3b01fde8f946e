//! Conversation Messages
//!
//! Identifiers and value types shared by the decoder, the request controller
//! and the conversation store, plus the request body sent to the backend.
//!
//! # Wire Shapes
//!
//! ```text
//! request:  { "query": "...", "doc_ids": ["..."], "history": [{ "role": "user", "content": "..." }] }
//! citation: { "text": "...", "score": 0.92, "source": "design.pdf" }
//! usage:    { "input_tokens": 10, "output_tokens": 5 }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a conversation turn
///
/// Handed out when a turn is created and threaded through the controller so
/// that stream events always address an explicit turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a new unique turn ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn_{}", self.0.simple())
    }
}

/// Who authored a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions
    User,
    /// The question-answering backend
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A retrieved snippet backing an answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// The snippet text
    pub text: String,
    /// Similarity score in `[0, 1]`
    #[serde(default)]
    pub score: f64,
    /// Label of the originating document
    #[serde(default = "unknown_source")]
    pub source: String,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

impl Citation {
    /// Create a citation, clamping the score into `[0, 1]`
    pub fn new(text: impl Into<String>, score: f64, source: impl Into<String>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            text: text.into(),
            score,
            source: source.into(),
        }
    }
}

/// Token accounting reported by the terminal `done` frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub input_tokens: u64,
    /// Tokens produced in the answer
    pub output_tokens: u64,
}

impl Usage {
    /// Create a usage record
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output tokens, saturating at `u64::MAX`
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One prior turn forwarded to the backend as context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the turn
    pub role: Role,
    /// Final (or frozen) content of the turn
    pub content: String,
}

/// Body of a streaming chat request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's question
    pub query: String,
    /// Documents to answer from (empty = all documents)
    pub doc_ids: Vec<String>,
    /// Prior turns, oldest first
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    /// Create a request with no history and no document restriction
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Restrict the request to the given documents
    #[must_use]
    pub fn with_doc_ids(mut self, doc_ids: Vec<String>) -> Self {
        self.doc_ids = doc_ids;
        self
    }

    /// Attach conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }
}
