//! Conversation Store
//!
//! The state container a presentation layer owns. It holds the turn
//! sequence, the document library and the request controller, and is the
//! only mutation surface for all three.
//!
//! # Driving the Store
//!
//! The store never runs on its own. A surface either awaits
//! [`ConversationStore::next_update`] (typically inside `tokio::select!`
//! alongside user input) or calls [`ConversationStore::poll_streaming`] once
//! per frame. Both apply stream signals in arrival order and fire the
//! configured [`StreamHooks`] when a request settles.
//!
//! # Hooks
//!
//! Hooks live in a [`HookCell`] that is read every time a hook fires, so a
//! surface can swap them at any point (even mid-stream) and the next
//! dispatch sees the new set.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::backend::{ChatBackend, DocumentStore, HealthStatus};
use crate::config::ClientConfig;
use crate::controller::{RequestController, RequestOutcome, StoreUpdate, UpdateKind};
use crate::conversation::{Conversation, Turn};
use crate::documents::{Document, DocumentLibrary, DocumentScope, ScopeMode, UploadReceipt};
use crate::error::{BackendError, SubmitError};
use crate::messages::{ChatRequest, TurnId};

// ============================================================================
// Hooks
// ============================================================================

/// Called with the finished assistant turn
pub type DoneHook = Arc<dyn Fn(&Turn) + Send + Sync>;

/// Called with the failure message of a request
pub type ErrorHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks fired when a request settles
///
/// Cancellation and supersession fire neither hook.
#[derive(Clone, Default)]
pub struct StreamHooks {
    /// Fired when a stream completes
    pub on_done: Option<DoneHook>,
    /// Fired when the server or the transport fails a request
    pub on_error: Option<ErrorHook>,
}

impl StreamHooks {
    /// No hooks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the completion hook
    #[must_use]
    pub fn on_done(mut self, hook: impl Fn(&Turn) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(hook));
        self
    }

    /// Set the failure hook
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// Shared, swappable hook set
#[derive(Clone, Default)]
pub struct HookCell(Arc<RwLock<StreamHooks>>);

impl HookCell {
    /// Create a cell holding `hooks`
    #[must_use]
    pub fn new(hooks: StreamHooks) -> Self {
        Self(Arc::new(RwLock::new(hooks)))
    }

    /// Replace the hook set
    pub fn replace(&self, hooks: StreamHooks) {
        *self.0.write() = hooks;
    }

    /// Snapshot of the current hooks
    #[must_use]
    pub fn current(&self) -> StreamHooks {
        self.0.read().clone()
    }
}

// ============================================================================
// Store
// ============================================================================

/// An accepted query
#[derive(Debug)]
pub struct Submission {
    /// The user turn holding the query
    pub user_turn: TurnId,
    /// The assistant turn the answer streams into
    pub assistant_turn: TurnId,
    /// Generation of the request
    pub generation: u64,
    /// Resolves once the request settles
    pub completion: oneshot::Receiver<RequestOutcome>,
}

/// Conversation state plus the request that feeds it
pub struct ConversationStore<B: ChatBackend> {
    conversation: Conversation,
    controller: RequestController<B>,
    library: DocumentLibrary,
    hooks: HookCell,
    history_limit: usize,
}

impl<B: ChatBackend + 'static> ConversationStore<B> {
    /// Create a store over `backend`
    pub fn new(backend: B, config: &ClientConfig) -> Self {
        Self::with_backend(Arc::new(backend), config)
    }

    /// Create a store over a shared backend
    pub fn with_backend(backend: Arc<B>, config: &ClientConfig) -> Self {
        Self {
            conversation: Conversation::new(),
            controller: RequestController::new(backend, config.event_buffer, config.idle_timeout),
            library: DocumentLibrary::new(),
            hooks: HookCell::default(),
            history_limit: config.history_limit,
        }
    }

    /// Submit a query
    ///
    /// Appends the user turn and an empty assistant turn, then starts the
    /// request with every earlier turn as history.
    ///
    /// # Errors
    ///
    /// Rejected without touching any turn when the query is blank, a request
    /// is already streaming, or the scope is "selected" with nothing selected.
    pub fn submit_query(&mut self, text: &str) -> Result<Submission, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyQuery);
        }
        if self.is_streaming() || self.conversation.open_turn().is_some() {
            tracing::debug!("Rejecting submission while streaming");
            return Err(SubmitError::Busy);
        }
        let scope = self.library.effective_scope();
        if matches!(&scope, DocumentScope::Subset(ids) if ids.is_empty()) {
            return Err(SubmitError::EmptySelection);
        }

        let history = self.conversation.history(self.history_limit);
        let request = ChatRequest::new(text)
            .with_doc_ids(scope.doc_ids())
            .with_history(history);

        let user_turn = self.conversation.push_user(text);
        let handle = match self.controller.send(&mut self.conversation, request) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Could not open assistant turn");
                return Err(SubmitError::Busy);
            }
        };

        Ok(Submission {
            user_turn,
            assistant_turn: handle.turn,
            generation: handle.generation,
            completion: handle.completion,
        })
    }

    /// Cancel the streaming request, keeping the partial answer
    ///
    /// Returns whether anything was cancelled.
    pub fn cancel(&mut self) -> bool {
        self.controller.abort(&mut self.conversation)
    }

    /// Whether a request is streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.controller.is_streaming()
    }

    /// Generation of the most recent request
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.controller.generation()
    }

    /// All turns in display order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        self.conversation.turns()
    }

    /// Read-only view of the conversation
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Remove every turn, cancelling any streaming request first
    pub fn clear_conversation(&mut self) {
        self.cancel();
        self.conversation.clear();
        tracing::info!("Conversation cleared");
    }

    // ------------------------------------------------------------------------
    // Stream delivery
    // ------------------------------------------------------------------------

    /// Apply every queued stream signal without waiting
    pub fn poll_streaming(&mut self) -> Vec<StoreUpdate> {
        let updates = self.controller.poll(&mut self.conversation);
        for update in &updates {
            self.dispatch_hooks(update);
        }
        updates
    }

    /// Wait for the next change to the streaming turn
    ///
    /// Returns `None` when nothing is streaming. Cancel safe.
    pub async fn next_update(&mut self) -> Option<StoreUpdate> {
        let update = self.controller.next_update(&mut self.conversation).await?;
        self.dispatch_hooks(&update);
        Some(update)
    }

    /// Drive the streaming request until it settles
    ///
    /// Returns the outcome, or `None` if nothing was streaming.
    pub async fn run_to_completion(&mut self) -> Option<RequestOutcome> {
        while let Some(update) = self.next_update().await {
            if let UpdateKind::Finished(outcome) = update.kind {
                return Some(outcome);
            }
        }
        None
    }

    /// Replace the hook set
    pub fn set_hooks(&self, hooks: StreamHooks) {
        self.hooks.replace(hooks);
    }

    /// Handle to the hook cell, for reconfiguring hooks from elsewhere
    #[must_use]
    pub fn hooks(&self) -> HookCell {
        self.hooks.clone()
    }

    fn dispatch_hooks(&self, update: &StoreUpdate) {
        let UpdateKind::Finished(outcome) = &update.kind else {
            return;
        };
        let hooks = self.hooks.current();
        match outcome {
            RequestOutcome::Completed { .. } => {
                if let (Some(on_done), Some(turn)) =
                    (hooks.on_done, self.conversation.get(&update.turn))
                {
                    on_done(turn);
                }
            }
            RequestOutcome::Failed(message) => {
                if let Some(on_error) = hooks.on_error {
                    on_error(message);
                }
            }
            RequestOutcome::Cancelled | RequestOutcome::Superseded => {}
        }
    }

    // ------------------------------------------------------------------------
    // Document scope
    // ------------------------------------------------------------------------

    /// Known documents and the current selection
    #[must_use]
    pub fn library(&self) -> &DocumentLibrary {
        &self.library
    }

    /// Scope the next query would use
    #[must_use]
    pub fn document_scope(&self) -> DocumentScope {
        self.library.effective_scope()
    }

    /// Flip selection of a known document
    pub fn toggle_document(&mut self, id: &str) -> Option<bool> {
        self.library.toggle(id)
    }

    /// Switch between all documents and the selected subset
    pub fn set_scope(&mut self, mode: ScopeMode) {
        self.library.set_mode(mode);
    }

    /// Query the backend's health
    ///
    /// # Errors
    ///
    /// Propagates the backend failure.
    pub async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.controller.backend().health_check().await
    }
}

impl<B: ChatBackend + DocumentStore + 'static> ConversationStore<B> {
    /// Reload the document list from the backend
    ///
    /// Returns the number of known documents.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure; the library is left untouched.
    pub async fn refresh_documents(&mut self) -> Result<usize, BackendError> {
        let documents = self.controller.backend().list_documents().await?;
        let count = documents.len();
        self.library.replace_all(documents);
        tracing::debug!(count, "Document list refreshed");
        Ok(count)
    }

    /// Upload a file and select it
    ///
    /// # Errors
    ///
    /// A rejected upload carries the server's detail message.
    pub async fn upload_document(
        &mut self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<UploadReceipt, BackendError> {
        let receipt = self
            .controller
            .backend()
            .upload_document(filename, contents)
            .await?;
        self.library.add(Document {
            id: receipt.id.clone(),
            filename: filename.to_string(),
            chunk_count: receipt.chunk_count,
            uploaded_at: Utc::now(),
        });
        tracing::info!(doc_id = %receipt.id, chunks = receipt.chunk_count, "Document uploaded");
        Ok(receipt)
    }

    /// Delete a document, returning whether the backend accepted it
    pub async fn delete_document(&mut self, id: &str) -> bool {
        if !self.controller.backend().delete_document(id).await {
            return false;
        }
        self.library.remove(id);
        true
    }
}
