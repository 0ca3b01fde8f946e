//! Request Lifecycle Controller
//!
//! Owns the single outstanding answer stream of a conversation and
//! translates its events into turn mutations.
//!
//! # Generations
//!
//! Every [`RequestController::send`] bumps a generation counter. The pump
//! task spawned for a request tags everything it forwards with the generation
//! it was started under, and [`RequestController::apply`] drops any signal
//! whose generation is not the active request's. Superseding or cancelling a
//! request is therefore synchronous with respect to turn mutation: once
//! `send`/`abort` returns, nothing from the old request can reach the
//! conversation, even if it is already queued in the channel.
//!
//! ```text
//!  send() ─► generation += 1 ─► tokio::spawn(pump) ─► open_stream ─► decode ─┐
//!                                                                              │
//!  apply() ◄── Dispatch { generation, signal } ◄── mpsc ◄─────────────────────┘
//!     │
//!     └─ generation != active? ─► discard
//! ```
//!
//! The pump stops reading after the first terminal event, so the connection
//! is released as soon as an answer is done. Dropping the active request
//! aborts its pump.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{ByteStream, ChatBackend};
use crate::conversation::{Conversation, Turn, TurnError};
use crate::error::BackendError;
use crate::messages::{ChatRequest, Role, TurnId, Usage};
use crate::streaming::{decode_stream, ServerEvent};

// ============================================================================
// Outcomes and Updates
// ============================================================================

/// How a request ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The stream finished normally
    Completed {
        /// Usage from the `done` frame; `None` if the stream ended without one
        usage: Option<Usage>,
    },
    /// The server or the transport failed the request
    Failed(String),
    /// The user cancelled
    Cancelled,
    /// A newer request replaced this one
    Superseded,
}

/// What applying a stream signal changed
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateKind {
    /// Text appended to the turn
    Token(String),
    /// Sources attached (count)
    Sources(usize),
    /// The request settled and the turn is closed
    Finished(RequestOutcome),
}

/// A change applied to a turn
#[derive(Clone, Debug, PartialEq)]
pub struct StoreUpdate {
    /// The turn that changed
    pub turn: TurnId,
    /// What changed
    pub kind: UpdateKind,
}

/// Returned by [`RequestController::send`]
#[derive(Debug)]
pub struct RequestHandle {
    /// Generation the request runs under
    pub generation: u64,
    /// Assistant turn the request fills
    pub turn: TurnId,
    /// Resolves with the outcome once the request settles
    pub completion: oneshot::Receiver<RequestOutcome>,
}

// ============================================================================
// Pump Signals
// ============================================================================

/// Something the pump observed
#[derive(Debug)]
pub enum StreamSignal {
    /// A decoded frame
    Event(ServerEvent),
    /// The connection failed
    Transport(BackendError),
    /// The body ended without a terminal frame
    Closed,
}

/// A pump signal tagged with the generation that produced it
#[derive(Debug)]
pub struct Dispatch {
    /// Generation of the request that produced the signal
    pub generation: u64,
    /// The signal
    pub signal: StreamSignal,
}

struct ActiveRequest {
    generation: u64,
    turn: TurnId,
    task: JoinHandle<()>,
    completion: Option<oneshot::Sender<RequestOutcome>>,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Owner of the in-flight answer stream
pub struct RequestController<B: ChatBackend> {
    backend: Arc<B>,
    generation: u64,
    active: Option<ActiveRequest>,
    events_tx: mpsc::Sender<Dispatch>,
    events_rx: mpsc::Receiver<Dispatch>,
    idle_timeout: Option<Duration>,
}

impl<B: ChatBackend + 'static> RequestController<B> {
    /// Create a controller
    ///
    /// `event_buffer` bounds how many undelivered signals a pump may queue
    /// before it waits for the store to catch up.
    pub fn new(backend: Arc<B>, event_buffer: usize, idle_timeout: Option<Duration>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        Self {
            backend,
            generation: 0,
            active: None,
            events_tx,
            events_rx,
            idle_timeout,
        }
    }

    /// The backend requests are sent to
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Current generation (0 before the first request)
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a request is outstanding
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Assistant turn of the outstanding request
    #[must_use]
    pub fn active_turn(&self) -> Option<&TurnId> {
        self.active.as_ref().map(|a| &a.turn)
    }

    /// Start a request, superseding any outstanding one
    ///
    /// The question must already be the conversation's latest turn (see
    /// [`Conversation::push_user`]). Opens the assistant turn the answer
    /// streams into and spawns the pump. Must be called from within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::NoPendingQuestion`] if the latest turn is not a
    /// user turn, and [`TurnError::OpenTurnExists`] if the conversation has
    /// an open assistant turn this controller does not own. An outstanding
    /// request is left running when the latest turn is not a user turn.
    pub fn send(
        &mut self,
        conversation: &mut Conversation,
        request: ChatRequest,
    ) -> Result<RequestHandle, TurnError> {
        if conversation.last().map(Turn::role) != Some(Role::User) {
            return Err(TurnError::NoPendingQuestion);
        }
        if self.active.is_some() {
            tracing::info!(generation = self.generation, "Superseding outstanding request");
            self.settle(conversation, RequestOutcome::Superseded);
        }

        let turn = conversation.open_assistant()?;
        self.generation += 1;
        let generation = self.generation;

        tracing::info!(
            generation,
            turn = %turn,
            backend = self.backend.name(),
            history = request.history.len(),
            "Starting request"
        );

        let task = tokio::spawn(pump(
            Arc::clone(&self.backend),
            request,
            generation,
            self.events_tx.clone(),
            self.idle_timeout,
        ));

        let (completion_tx, completion_rx) = oneshot::channel();
        self.active = Some(ActiveRequest {
            generation,
            turn: turn.clone(),
            task,
            completion: Some(completion_tx),
        });

        Ok(RequestHandle {
            generation,
            turn,
            completion: completion_rx,
        })
    }

    /// Cancel the outstanding request, if any
    ///
    /// The turn keeps whatever content it had; no error text is added.
    /// Returns whether a request was cancelled.
    pub fn abort(&mut self, conversation: &mut Conversation) -> bool {
        if self.active.is_none() {
            return false;
        }
        tracing::info!(generation = self.generation, "Aborting request");
        self.settle(conversation, RequestOutcome::Cancelled);
        true
    }

    /// Apply one pump signal to the conversation
    ///
    /// Signals from any generation other than the active request's are
    /// discarded without touching the conversation.
    pub fn apply(
        &mut self,
        dispatch: Dispatch,
        conversation: &mut Conversation,
    ) -> Option<StoreUpdate> {
        let turn = match &self.active {
            Some(active) if active.generation == dispatch.generation => active.turn.clone(),
            _ => {
                tracing::debug!(
                    generation = dispatch.generation,
                    current = self.generation,
                    "Discarding stale stream signal"
                );
                return None;
            }
        };

        match dispatch.signal {
            StreamSignal::Event(ServerEvent::Token { content }) => {
                match conversation.append_token(&turn, &content) {
                    Ok(()) => Some(StoreUpdate {
                        turn,
                        kind: UpdateKind::Token(content),
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping token");
                        None
                    }
                }
            }
            StreamSignal::Event(ServerEvent::Sources { sources }) => {
                let count = sources.len();
                match conversation.attach_sources(&turn, sources) {
                    Ok(()) => Some(StoreUpdate {
                        turn,
                        kind: UpdateKind::Sources(count),
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping sources");
                        None
                    }
                }
            }
            StreamSignal::Event(ServerEvent::Done { usage }) => {
                if let Err(e) = conversation.attach_usage(&turn, usage) {
                    tracing::warn!(error = %e, "Dropping usage");
                }
                self.settle(conversation, RequestOutcome::Completed { usage: Some(usage) })
            }
            StreamSignal::Event(ServerEvent::Error { message }) => {
                tracing::error!(message = %message, "Server reported an error");
                annotate(conversation, &turn, &format!("\n\n**Error:** {message}"));
                self.settle(conversation, RequestOutcome::Failed(message))
            }
            StreamSignal::Transport(e) => {
                tracing::error!(error = %e, "Stream transport failed");
                annotate(conversation, &turn, &format!("\n\n**Connection Error:** {e}"));
                self.settle(conversation, RequestOutcome::Failed(e.to_string()))
            }
            StreamSignal::Closed => {
                tracing::warn!(turn = %turn, "Stream ended without a done frame");
                self.settle(conversation, RequestOutcome::Completed { usage: None })
            }
        }
    }

    /// Apply every signal already queued, without waiting
    pub fn poll(&mut self, conversation: &mut Conversation) -> Vec<StoreUpdate> {
        let mut updates = Vec::new();
        while let Ok(dispatch) = self.events_rx.try_recv() {
            if let Some(update) = self.apply(dispatch, conversation) {
                updates.push(update);
            }
        }
        updates
    }

    /// Wait for the next change to the active request's turn
    ///
    /// Returns `None` immediately when no request is outstanding. Cancel
    /// safe: dropping the future loses no signal.
    pub async fn next_update(&mut self, conversation: &mut Conversation) -> Option<StoreUpdate> {
        while self.active.is_some() {
            let dispatch = self.events_rx.recv().await?;
            if let Some(update) = self.apply(dispatch, conversation) {
                return Some(update);
            }
        }
        None
    }

    /// Close the active turn and resolve its completion signal
    fn settle(
        &mut self,
        conversation: &mut Conversation,
        outcome: RequestOutcome,
    ) -> Option<StoreUpdate> {
        let mut active = self.active.take()?;
        conversation.close(&active.turn);
        if let Some(tx) = active.completion.take() {
            let _ = tx.send(outcome.clone());
        }

        tracing::info!(
            generation = active.generation,
            turn = %active.turn,
            outcome = ?outcome,
            "Request settled"
        );

        Some(StoreUpdate {
            turn: active.turn.clone(),
            kind: UpdateKind::Finished(outcome),
        })
    }
}

fn annotate(conversation: &mut Conversation, turn: &TurnId, text: &str) {
    if let Err(e) = conversation.append_token(turn, text) {
        tracing::warn!(error = %e, "Could not annotate turn");
    }
}

/// Read one response stream and forward its signals
async fn pump<B: ChatBackend + 'static>(
    backend: Arc<B>,
    request: ChatRequest,
    generation: u64,
    tx: mpsc::Sender<Dispatch>,
    idle_timeout: Option<Duration>,
) {
    let bytes = match backend.open_stream(&request).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tx
                .send(Dispatch {
                    generation,
                    signal: StreamSignal::Transport(e),
                })
                .await;
            return;
        }
    };

    let bytes = match idle_timeout {
        Some(limit) => with_idle_timeout(bytes, limit),
        None => bytes,
    };
    let mut events = Box::pin(decode_stream(bytes));

    loop {
        let (signal, last) = match events.next().await {
            Some(Ok(event)) => {
                let terminal = event.is_terminal();
                (StreamSignal::Event(event), terminal)
            }
            Some(Err(e)) => (StreamSignal::Transport(e), true),
            None => (StreamSignal::Closed, true),
        };

        if tx.send(Dispatch { generation, signal }).await.is_err() {
            // Controller dropped
            return;
        }
        if last {
            break;
        }
    }

    tracing::debug!(generation, "Pump finished");
}

/// Fail a body that delivers no bytes for `limit`
///
/// Any chunk resets the window, including keep-alive comment lines that
/// decode to no event.
fn with_idle_timeout(bytes: ByteStream, limit: Duration) -> ByteStream {
    futures::stream::unfold(Some(bytes), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(limit, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => Some((Err(BackendError::IdleTimeout(limit)), None)),
        }
    })
    .boxed()
}
