//! Streaming Answer Protocol
//!
//! The backend answers a chat request with newline-delimited frames. Only
//! lines of the form `data: <JSON>` carry payload; everything else (blank
//! separators, comments, `event:` lines) is framing and ignored.
//!
//! ```text
//! data: {"type":"sources","sources":[{"text":"..","score":0.92,"source":"a.pdf"}]}
//!
//! data: {"type":"token","content":"X "}
//!
//! data: {"type":"done","usage":{"input_tokens":10,"output_tokens":5}}
//! ```
//!
//! # Pipeline
//!
//! ```text
//! bytes ──► LineBuffer ──► complete lines ──► StreamDecoder ──► ServerEvent
//!              │                                   │
//!        trailing fragment                  malformed line:
//!        kept for next chunk                logged + skipped
//! ```
//!
//! Frame boundaries need not line up with chunk boundaries; the decoder
//! emits the same events however the bytes were split.

mod decoder;

pub use decoder::{decode_stream, LineBuffer, ServerEvent, StreamDecoder, DATA_PREFIX};
