//! KB Client Core - Headless Streaming Answers for kb-chat
//!
//! This crate turns the question-answering backend's streamed responses into
//! a conversation a presentation layer can render. It has no UI dependencies;
//! the console shell is one surface, a test harness is another.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Presentation Layer                           │
//! │        (kb-shell, tests, any surface owning the store)            │
//! └───────────────┬──────────────────────────────▲───────────────────┘
//!                 │ submit_query / cancel         │ StoreUpdate, hooks
//! ┌───────────────▼──────────────────────────────┴───────────────────┐
//! │                      ConversationStore                            │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌──────────────────┐   │
//! │  │ Conversation │◄─│ RequestController │  │ DocumentLibrary  │   │
//! │  │   (turns)    │  │   (generations)   │  │ (scope, select)  │   │
//! │  └──────────────┘  └─────────┬─────────┘  └──────────────────┘   │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │ pump task
//!                  ┌─────────────▼─────────────┐
//!                  │ StreamDecoder ◄─ ByteStream │
//!                  └─────────────▲─────────────┘
//!                                │
//!                  ┌─────────────┴─────────────┐
//!                  │  ChatBackend (HTTP / test) │
//!                  └───────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConversationStore`]: The state container a surface owns
//! - [`RequestController`]: One outstanding answer stream, with supersession
//! - [`StreamDecoder`]: Bytes to [`ServerEvent`]s, robust to arbitrary chunking
//! - [`Conversation`]: Ordered turns and their mutation rules
//! - [`HttpBackend`]: The REST/event-stream backend
//!
//! # Quick Start
//!
//! ```ignore
//! use kb_client_core::{load_config, ConversationStore, HttpBackend, UpdateKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = HttpBackend::from_config(&config)?;
//!     let mut store = ConversationStore::new(backend, &config);
//!
//!     store.submit_query("What is X?")?;
//!     while let Some(update) = store.next_update().await {
//!         if let UpdateKind::Token(text) = update.kind {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Backend traits and the HTTP implementation
//! - [`config`]: Layered configuration (defaults, file, environment, CLI)
//! - [`controller`]: Request lifecycle and generation tracking
//! - [`conversation`]: Turns and their invariants
//! - [`documents`]: Document library and query scope
//! - [`error`]: Backend and submission errors
//! - [`messages`]: Identifiers and wire value types
//! - [`store`]: The conversation store and its hooks
//! - [`streaming`]: The stream decoder
//!
//! # Logging
//!
//! The crate only emits `tracing` events; installing a subscriber is the
//! binary's job.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod documents;
pub mod error;
pub mod messages;
pub mod store;
pub mod streaming;

// Re-exports for convenience
pub use backend::{ByteStream, ChatBackend, DocumentStore, HealthStatus, HttpBackend};
pub use controller::{
    Dispatch, RequestController, RequestHandle, RequestOutcome, StoreUpdate, StreamSignal,
    UpdateKind,
};
pub use conversation::{Conversation, Turn, TurnError};
pub use documents::{Document, DocumentLibrary, DocumentScope, ScopeMode, UploadReceipt};
pub use error::{BackendError, SubmitError};
pub use messages::{ChatRequest, Citation, HistoryEntry, Role, TurnId, Usage};
pub use store::{ConversationStore, DoneHook, ErrorHook, HookCell, StreamHooks, Submission};
pub use streaming::{decode_stream, ServerEvent, StreamDecoder};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
