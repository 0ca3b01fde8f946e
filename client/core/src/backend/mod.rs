//! Backend Integration
//!
//! Access to the question-answering backend through a common trait
//! interface, so the controller can be driven by the real HTTP API or by a
//! scripted test double.
//!
//! # Usage
//!
//! ```ignore
//! use kb_client_core::backend::{ChatBackend, HttpBackend};
//! use kb_client_core::ChatRequest;
//!
//! let backend = HttpBackend::from_config(&config)?;
//! let bytes = backend.open_stream(&ChatRequest::new("What is X?")).await?;
//! ```

mod http;
mod traits;

pub use http::{HttpBackend, DEFAULT_BASE_URL};
pub use traits::{ByteStream, ChatBackend, DocumentStore, HealthStatus};
