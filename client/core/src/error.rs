//! Error Types
//!
//! Errors surfaced by the backend layer and by the conversation store's
//! mutation API. Turn-level rejections live in [`crate::conversation::TurnError`],
//! configuration errors in [`crate::config::ConfigError`].

use std::time::Duration;

use thiserror::Error;

/// Failure talking to the question-answering backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, reset, or otherwise failed below HTTP
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status
    #[error("HTTP error {status}: {detail}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Human-readable detail from the response body
        detail: String,
    },

    /// The response body did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No bytes arrived within the configured idle window
    #[error("stream idle for {0:?}")]
    IdleTimeout(Duration),
}

impl BackendError {
    /// Human-readable detail for display next to a failed action
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Status { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Rejected query submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The query was empty or whitespace-only
    #[error("query is empty")]
    EmptyQuery,
    /// A request is already streaming
    #[error("a response is still streaming")]
    Busy,
    /// Scope is "selected" but no document is selected
    #[error("no documents selected")]
    EmptySelection,
}
