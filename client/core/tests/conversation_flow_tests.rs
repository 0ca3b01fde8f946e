//! Conversation Flow Tests
//!
//! Drive a [`ConversationStore`] (and, for supersession, a bare
//! [`RequestController`]) against a scripted backend whose response bodies
//! are fed chunk by chunk from the test. Covers:
//! - The end-to-end token/sources/done sequence
//! - Supersession and cancellation leaving no stale mutation
//! - Server and transport failures surfacing as inline text
//! - Idle timeout

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_test::{assert_err, assert_ok};

use kb_client_core::{
    BackendError, ByteStream, ChatBackend, ChatRequest, ClientConfig, Conversation,
    ConversationStore, HealthStatus, RequestController, RequestOutcome, Role, SubmitError,
    UpdateKind, Usage,
};

// =============================================================================
// Scripted Backend
// =============================================================================

type Chunk = Result<Bytes, BackendError>;

enum Script {
    Body(mpsc::Receiver<Chunk>),
    Refuse(BackendError),
}

/// Backend whose responses are scripted in request order
#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response body; chunks sent on the returned sender are
    /// delivered to the client, dropping it ends the body
    fn script(&self) -> mpsc::Sender<Chunk> {
        let (tx, rx) = mpsc::channel(64);
        self.scripts.lock().push_back(Script::Body(rx));
        tx
    }

    /// Queue a refused request
    fn refuse(&self, err: BackendError) {
        self.scripts.lock().push_back(Script::Refuse(err));
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            doc_count: 0,
            vector_count: 0,
        })
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        self.requests.lock().push(request.clone());
        match self.scripts.lock().pop_front() {
            Some(Script::Body(rx)) => Ok(ReceiverStream::new(rx).boxed()),
            Some(Script::Refuse(err)) => Err(err),
            None => Err(BackendError::InvalidResponse("no scripted response".to_string())),
        }
    }
}

fn frame(json: &str) -> Chunk {
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

fn token(text: &str) -> Chunk {
    frame(&format!(r#"{{"type":"token","content":"{text}"}}"#))
}

/// Let spawned pumps run until `count` requests reached the backend
async fn recorded_requests(backend: &ScriptedBackend, count: usize) -> Vec<ChatRequest> {
    for _ in 0..100 {
        let requests = backend.requests();
        if requests.len() >= count {
            return requests;
        }
        tokio::task::yield_now().await;
    }
    panic!("backend never saw {count} request(s)");
}

fn store_over(backend: &Arc<ScriptedBackend>) -> ConversationStore<ScriptedBackend> {
    ConversationStore::with_backend(Arc::clone(backend), &ClientConfig::default())
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_end_to_end_answer() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);

    let submission = assert_ok!(store.submit_query("What is X?"));
    assert!(store.is_streaming());
    assert_eq!(store.turns().len(), 2);
    assert_eq!(store.turns()[0].role(), Role::User);
    assert_eq!(store.turns()[0].content(), "What is X?");
    assert_eq!(store.turns()[1].role(), Role::Assistant);
    assert_eq!(store.turns()[1].content(), "");

    for text in ["X ", "is ", "42."] {
        body.send(token(text)).await.unwrap();
    }
    body.send(frame(
        r#"{"type":"sources","sources":[{"text":"X is defined as 42","score":0.92,"source":"facts.pdf"}]}"#,
    ))
    .await
    .unwrap();
    body.send(frame(
        r#"{"type":"done","usage":{"input_tokens":10,"output_tokens":5}}"#,
    ))
    .await
    .unwrap();

    let outcome = store.run_to_completion().await;
    assert_eq!(
        outcome,
        Some(RequestOutcome::Completed {
            usage: Some(Usage::new(10, 5))
        })
    );
    assert!(!store.is_streaming());

    let answer = store.conversation().get(&submission.assistant_turn).unwrap();
    assert_eq!(answer.content(), "X is 42.");
    assert_eq!(answer.sources().unwrap().len(), 1);
    assert_eq!(answer.sources().unwrap()[0].source, "facts.pdf");
    assert_eq!(answer.usage(), Some(&Usage::new(10, 5)));
    assert!(!answer.is_open());

    let request = &backend.requests()[0];
    assert_eq!(request.query, "What is X?");
    assert!(request.doc_ids.is_empty());
    assert!(request.history.is_empty());

    assert_eq!(
        submission.completion.await.unwrap(),
        RequestOutcome::Completed {
            usage: Some(Usage::new(10, 5))
        }
    );
}

#[tokio::test]
async fn test_frames_split_across_chunks() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("split"));

    for piece in [
        "data: {\"typ",
        "e\":\"token\",\"content\":\"hi\"}\n",
        "\ndata: {\"type\":\"token\",\"con",
        "tent\":\" caf\u{e9}\"}\n\ndata: {\"type\":\"done\"}",
    ] {
        body.send(Ok(Bytes::from(piece))).await.unwrap();
    }
    drop(body);

    store.run_to_completion().await;
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "hi café"
    );
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(token("before ")).await.unwrap();
    body.send(Ok(Bytes::from_static(b"data: {not json\n\n"))).await.unwrap();
    body.send(token("after")).await.unwrap();
    body.send(frame(r#"{"type":"done"}"#)).await.unwrap();

    store.run_to_completion().await;
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "before after"
    );
}

#[tokio::test]
async fn test_nothing_applied_after_done() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(Ok(Bytes::from(concat!(
        "data: {\"type\":\"token\",\"content\":\"final\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
        "data: {\"type\":\"token\",\"content\":\" trailing\"}\n\n",
    ))))
    .await
    .unwrap();

    store.run_to_completion().await;
    assert!(store.next_update().await.is_none());
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "final"
    );
}

// =============================================================================
// Cancellation and Supersession
// =============================================================================

#[tokio::test]
async fn test_cancel_keeps_partial_answer() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("long question"));

    body.send(token("partial")).await.unwrap();
    let update = store.next_update().await.unwrap();
    assert_eq!(update.kind, UpdateKind::Token("partial".to_string()));

    assert!(store.cancel());
    assert!(!store.cancel());
    assert!(!store.is_streaming());

    // Arrives after cancellation
    let _ = body.send(token(" ignored")).await;
    assert!(store.poll_streaming().is_empty());

    assert_eq!(store.turns().len(), 2);
    assert_eq!(store.turns()[0].content(), "long question");
    let answer = store.conversation().get(&submission.assistant_turn).unwrap();
    assert_eq!(answer.content(), "partial");
    assert!(!answer.is_open());
    assert_eq!(submission.completion.await.unwrap(), RequestOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_without_request_is_noop() {
    let backend = ScriptedBackend::new();
    let mut store = store_over(&backend);

    assert!(!store.cancel());
    assert!(!store.cancel());
    assert!(store.turns().is_empty());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_busy_store_rejects_submission() {
    let backend = ScriptedBackend::new();
    let _body = backend.script();
    let mut store = store_over(&backend);

    assert_ok!(store.submit_query("first"));
    assert_eq!(assert_err!(store.submit_query("second")), SubmitError::Busy);
    assert_eq!(store.turns().len(), 2);
    assert_eq!(recorded_requests(&backend, 1).await.len(), 1);
}

#[tokio::test]
async fn test_superseded_request_never_mutates_new_turn() {
    let backend = ScriptedBackend::new();
    let old_body = backend.script();
    let new_body = backend.script();
    let mut conversation = Conversation::new();
    let mut controller = RequestController::new(Arc::clone(&backend), 16, None);

    conversation.push_user("slow question");
    let old = controller
        .send(&mut conversation, ChatRequest::new("slow question"))
        .unwrap();

    // One chunk, three frames: the pump forwards all of them before the
    // first is applied
    old_body
        .send(Ok(Bytes::from(concat!(
            "data: {\"type\":\"token\",\"content\":\"old-1\"}\n\n",
            "data: {\"type\":\"token\",\"content\":\"old-2\"}\n\n",
            "data: {\"type\":\"token\",\"content\":\"old-3\"}\n\n",
        ))))
        .await
        .unwrap();
    let first = controller.next_update(&mut conversation).await.unwrap();
    assert_eq!(first.kind, UpdateKind::Token("old-1".to_string()));

    conversation.push_user("new question");
    let new = controller
        .send(&mut conversation, ChatRequest::new("new question"))
        .unwrap();
    assert!(new.generation > old.generation);

    // The superseded pump is torn down, releasing its connection
    tokio::time::timeout(Duration::from_secs(1), old_body.closed())
        .await
        .unwrap();

    new_body.send(token("fresh")).await.unwrap();
    new_body
        .send(frame(r#"{"type":"done","usage":{"input_tokens":1,"output_tokens":1}}"#))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(update) = controller.next_update(&mut conversation).await {
        assert_eq!(update.turn, new.turn);
        kinds.push(update.kind);
    }
    assert_eq!(
        kinds,
        vec![
            UpdateKind::Token("fresh".to_string()),
            UpdateKind::Finished(RequestOutcome::Completed {
                usage: Some(Usage::new(1, 1))
            }),
        ]
    );

    assert_eq!(conversation.get(&old.turn).unwrap().content(), "old-1");
    assert_eq!(conversation.get(&new.turn).unwrap().content(), "fresh");
    assert_eq!(old.completion.await.unwrap(), RequestOutcome::Superseded);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_server_error_is_annotated() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(token("Thinking")).await.unwrap();
    body.send(frame(r#"{"type":"error","message":"LLM unavailable"}"#))
        .await
        .unwrap();

    let outcome = store.run_to_completion().await;
    assert_eq!(
        outcome,
        Some(RequestOutcome::Failed("LLM unavailable".to_string()))
    );
    let answer = store.conversation().get(&submission.assistant_turn).unwrap();
    assert_eq!(answer.content(), "Thinking\n\n**Error:** LLM unavailable");
    assert!(answer.usage().is_none());
}

#[tokio::test]
async fn test_nothing_applied_after_error() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(Ok(Bytes::from(concat!(
        "data: {\"type\":\"token\",\"content\":\"a\"}\n\n",
        "data: {\"type\":\"error\",\"message\":\"x\"}\n\n",
        "data: {\"type\":\"token\",\"content\":\"LATE\"}\n\n",
    ))))
    .await
    .unwrap();

    let outcome = store.run_to_completion().await;
    assert_eq!(outcome, Some(RequestOutcome::Failed("x".to_string())));
    assert!(store.next_update().await.is_none());
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "a\n\n**Error:** x"
    );
}

#[tokio::test]
async fn test_refused_request_is_annotated() {
    let backend = ScriptedBackend::new();
    backend.refuse(BackendError::Status {
        status: 503,
        detail: "index rebuilding".to_string(),
    });
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    store.run_to_completion().await;
    assert!(!store.is_streaming());
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "\n\n**Connection Error:** HTTP error 503: index rebuilding"
    );
}

#[tokio::test]
async fn test_transport_failure_mid_stream() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(token("half")).await.unwrap();
    body.send(Err(BackendError::InvalidResponse("connection reset".to_string())))
        .await
        .unwrap();

    let outcome = store.run_to_completion().await;
    assert!(matches!(outcome, Some(RequestOutcome::Failed(_))));
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "half\n\n**Connection Error:** invalid response: connection reset"
    );

    // The store accepts the next query
    let _next = backend.script();
    assert_ok!(store.submit_query("retry by hand"));
}

#[tokio::test]
async fn test_body_ending_without_done() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut store = store_over(&backend);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(token("cut short")).await.unwrap();
    drop(body);

    let outcome = store.run_to_completion().await;
    assert_eq!(outcome, Some(RequestOutcome::Completed { usage: None }));
    let answer = store.conversation().get(&submission.assistant_turn).unwrap();
    assert_eq!(answer.content(), "cut short");
    assert!(answer.usage().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_idle_stream_times_out() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut config = ClientConfig::default();
    config.idle_timeout = Some(Duration::from_secs(30));
    let mut store = ConversationStore::with_backend(Arc::clone(&backend), &config);
    let submission = assert_ok!(store.submit_query("q"));

    body.send(token("stalled")).await.unwrap();
    let outcome = store.run_to_completion().await;

    assert!(matches!(outcome, Some(RequestOutcome::Failed(_))));
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "stalled\n\n**Connection Error:** stream idle for 30s"
    );
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_comments_hold_stream_open() {
    let backend = ScriptedBackend::new();
    let body = backend.script();
    let mut config = ClientConfig::default();
    config.idle_timeout = Some(Duration::from_secs(30));
    let mut store = ConversationStore::with_backend(Arc::clone(&backend), &config);
    let submission = assert_ok!(store.submit_query("q"));

    // 50s of keep-alives, no frame, never 30s of silence
    for _ in 0..5 {
        body.send(Ok(Bytes::from_static(b": keep-alive\n\n"))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    body.send(token("late but alive")).await.unwrap();
    body.send(frame(r#"{"type":"done"}"#)).await.unwrap();

    let outcome = store.run_to_completion().await;
    assert!(matches!(outcome, Some(RequestOutcome::Completed { .. })));
    assert_eq!(
        store.conversation().get(&submission.assistant_turn).unwrap().content(),
        "late but alive"
    );
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_follow_up_carries_prior_turns() {
    let backend = ScriptedBackend::new();
    let first = backend.script();
    let second = backend.script();
    let mut store = store_over(&backend);

    assert_ok!(store.submit_query("What is X?"));
    first.send(token("42")).await.unwrap();
    first.send(frame(r#"{"type":"done"}"#)).await.unwrap();
    store.run_to_completion().await;

    assert_ok!(store.submit_query("Why?"));
    second.send(frame(r#"{"type":"done"}"#)).await.unwrap();
    store.run_to_completion().await;

    let requests = backend.requests();
    let history: Vec<(Role, &str)> = requests[1]
        .history
        .iter()
        .map(|h| (h.role, h.content.as_str()))
        .collect();
    assert_eq!(
        history,
        vec![(Role::User, "What is X?"), (Role::Assistant, "42")]
    );
}
