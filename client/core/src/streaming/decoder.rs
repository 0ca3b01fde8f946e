//! Stream Decoder Implementation
//!
//! Turns arbitrarily chunked response bytes into [`ServerEvent`]s.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::messages::{Citation, Usage};

/// Prefix marking a payload line
pub const DATA_PREFIX: &str = "data: ";

// ============================================================================
// Server Events
// ============================================================================

/// A decoded frame of the streaming protocol
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// A piece of answer text
    Token {
        /// Text to append
        content: String,
    },
    /// Retrieved sources for the answer
    Sources {
        /// Citations, in relevance order
        sources: Vec<Citation>,
    },
    /// The answer is complete
    Done {
        /// Token accounting (zeroed when the backend omits it)
        #[serde(default)]
        usage: Usage,
    },
    /// The backend gave up on the answer
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerEvent {
    /// Whether no further events of this stream may be applied
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Sources { .. } => "sources",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

// ============================================================================
// Line Buffer
// ============================================================================

/// Splits a byte stream into complete lines
///
/// Splitting happens on `\n` bytes before UTF-8 decoding; `\n` never occurs
/// inside a multi-byte sequence, so a character split across two chunks is
/// reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);

        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Take the trailing incomplete fragment, if any
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Bytes waiting for a newline
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Incremental decoder for one response stream
///
/// One instance per request; after [`StreamDecoder::finish`] it yields
/// nothing more.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    lines: LineBuffer,
    malformed: u64,
    finished: bool,
}

impl StreamDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        if self.finished {
            tracing::debug!(bytes = chunk.len(), "Ignoring chunk after end of stream");
            return Vec::new();
        }
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    /// Signal end of stream, flushing a trailing line without newline
    pub fn finish(&mut self) -> Vec<ServerEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.lines
            .take_remainder()
            .and_then(|line| self.decode_line(&line))
            .into_iter()
            .collect()
    }

    /// Number of payload lines that failed to parse
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed
    }

    fn decode_line(&mut self, line: &str) -> Option<ServerEvent> {
        let payload = line.trim().strip_prefix(DATA_PREFIX)?;

        match serde_json::from_str::<ServerEvent>(payload) {
            Ok(event) => {
                tracing::trace!(kind = event.kind(), "Decoded frame");
                Some(event)
            }
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(error = %e, line = %line, "Skipping malformed frame");
                None
            }
        }
    }
}

// ============================================================================
// Lazy Event Stream
// ============================================================================

struct DecodeState<S> {
    bytes: S,
    decoder: StreamDecoder,
    ready: VecDeque<ServerEvent>,
    exhausted: bool,
}

/// Adapt a byte stream into a lazy stream of events
///
/// A transport error is passed through as the final item. End of input
/// flushes the decoder.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<ServerEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        bytes,
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.exhausted = true;
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                }
            }
        }
    })
}
