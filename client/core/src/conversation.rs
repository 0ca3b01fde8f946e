//! Conversation State
//!
//! The ordered list of turns and the only code allowed to mutate them.
//!
//! # Turn Lifecycle
//!
//! ```text
//! push_user()      -> closed user turn
//! open_assistant() -> open assistant turn (content = "")
//!     append_token()* / attach_sources()? / attach_usage()?
//! close()          -> closed, content frozen
//! ```
//!
//! At most one turn is open at a time. Content of an open turn only grows;
//! `sources` and `usage` go from unset to set exactly once. Every mutation
//! addresses a turn by [`TurnId`] rather than by position.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::messages::{Citation, HistoryEntry, Role, TurnId, Usage};

/// Rejected turn mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// No turn with this ID exists
    #[error("unknown turn {0}")]
    UnknownTurn(TurnId),
    /// The turn is not an assistant turn
    #[error("turn {0} is not an assistant turn")]
    NotAssistant(TurnId),
    /// The turn was already finalized
    #[error("turn {0} is closed")]
    Closed(TurnId),
    /// Sources may only be attached once
    #[error("sources already attached to turn {0}")]
    SourcesAlreadySet(TurnId),
    /// Usage may only be attached once
    #[error("usage already attached to turn {0}")]
    UsageAlreadySet(TurnId),
    /// Another assistant turn is still receiving tokens
    #[error("turn {0} is still open")]
    OpenTurnExists(TurnId),
    /// An answer was requested but the latest turn is not a question
    #[error("no user turn to answer")]
    NoPendingQuestion,
}

/// One message in the conversation
#[derive(Clone, Debug, Serialize)]
pub struct Turn {
    id: TurnId,
    role: Role,
    content: String,
    sources: Option<Vec<Citation>>,
    usage: Option<Usage>,
    created_at: DateTime<Utc>,
    open: bool,
}

impl Turn {
    fn user(content: String) -> Self {
        Self {
            id: TurnId::new(),
            role: Role::User,
            content,
            sources: None,
            usage: None,
            created_at: Utc::now(),
            open: false,
        }
    }

    fn assistant() -> Self {
        Self {
            id: TurnId::new(),
            role: Role::Assistant,
            content: String::new(),
            sources: None,
            usage: None,
            created_at: Utc::now(),
            open: true,
        }
    }

    /// Turn identifier
    #[must_use]
    pub fn id(&self) -> &TurnId {
        &self.id
    }

    /// Author of the turn
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current content
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Retrieved sources, once attached
    #[must_use]
    pub fn sources(&self) -> Option<&[Citation]> {
        self.sources.as_deref()
    }

    /// Token usage, once attached
    #[must_use]
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the turn is still receiving tokens
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Ordered sequence of turns
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    open_turn: Option<TurnId>,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a (closed) user turn
    pub fn push_user(&mut self, content: impl Into<String>) -> TurnId {
        let turn = Turn::user(content.into());
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    /// Append an empty, open assistant turn
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::OpenTurnExists`] if another assistant turn is
    /// still open.
    pub fn open_assistant(&mut self) -> Result<TurnId, TurnError> {
        if let Some(open) = &self.open_turn {
            return Err(TurnError::OpenTurnExists(open.clone()));
        }
        let turn = Turn::assistant();
        let id = turn.id.clone();
        self.open_turn = Some(id.clone());
        self.turns.push(turn);
        Ok(id)
    }

    /// Append text to an open assistant turn
    ///
    /// # Errors
    ///
    /// Fails if the turn is unknown, not an assistant turn, or closed.
    pub fn append_token(&mut self, id: &TurnId, text: &str) -> Result<(), TurnError> {
        let turn = self.writable(id)?;
        turn.content.push_str(text);
        Ok(())
    }

    /// Attach retrieved sources to an open assistant turn
    ///
    /// # Errors
    ///
    /// Fails if the turn is not writable or already has sources.
    pub fn attach_sources(&mut self, id: &TurnId, sources: Vec<Citation>) -> Result<(), TurnError> {
        let turn = self.writable(id)?;
        if turn.sources.is_some() {
            return Err(TurnError::SourcesAlreadySet(id.clone()));
        }
        turn.sources = Some(sources);
        Ok(())
    }

    /// Attach usage to an open assistant turn
    ///
    /// # Errors
    ///
    /// Fails if the turn is not writable or already has usage.
    pub fn attach_usage(&mut self, id: &TurnId, usage: Usage) -> Result<(), TurnError> {
        let turn = self.writable(id)?;
        if turn.usage.is_some() {
            return Err(TurnError::UsageAlreadySet(id.clone()));
        }
        turn.usage = Some(usage);
        Ok(())
    }

    /// Finalize an assistant turn, freezing its content
    ///
    /// Returns `false` if the turn was unknown or already closed.
    pub fn close(&mut self, id: &TurnId) -> bool {
        let Some(turn) = self.turns.iter_mut().find(|t| &t.id == id) else {
            return false;
        };
        if !turn.open {
            return false;
        }
        turn.open = false;
        if self.open_turn.as_ref() == Some(id) {
            self.open_turn = None;
        }
        true
    }

    fn writable(&mut self, id: &TurnId) -> Result<&mut Turn, TurnError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| TurnError::UnknownTurn(id.clone()))?;
        if turn.role != Role::Assistant {
            return Err(TurnError::NotAssistant(id.clone()));
        }
        if !turn.open {
            return Err(TurnError::Closed(id.clone()));
        }
        Ok(turn)
    }

    /// History to forward with the next request
    ///
    /// Turns with empty content (placeholders, answers cancelled before the
    /// first token) are skipped. `limit` keeps only the most recent entries;
    /// 0 means unlimited.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries: Vec<HistoryEntry> = self
            .turns
            .iter()
            .filter(|t| !t.content.trim().is_empty())
            .map(|t| HistoryEntry {
                role: t.role,
                content: t.content.clone(),
            })
            .collect();

        if limit == 0 || entries.len() <= limit {
            return entries;
        }
        entries[entries.len() - limit..].to_vec()
    }

    /// Get a turn by ID
    #[must_use]
    pub fn get(&self, id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.id == id)
    }

    /// All turns in display order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// ID of the assistant turn currently receiving tokens
    #[must_use]
    pub fn open_turn(&self) -> Option<&TurnId> {
        self.open_turn.as_ref()
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Remove every turn
    pub fn clear(&mut self) {
        self.turns.clear();
        self.open_turn = None;
    }
}
