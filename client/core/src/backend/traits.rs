//! Backend Traits
//!
//! Trait definitions for the question-answering backend. The controller only
//! needs a byte stream per request; the store additionally talks to the
//! document store when managing the library.
//!
//! # Design Philosophy
//!
//! Decoding stays on the client side of the seam: a backend hands out raw
//! bytes and the controller runs them through its own
//! [`StreamDecoder`](crate::streaming::StreamDecoder). Test doubles therefore
//! exercise the real decoding path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::documents::{Document, UploadReceipt};
use crate::error::BackendError;
use crate::messages::ChatRequest;

/// Raw response body of a streaming chat request
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Backend health report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status string ("ok" when healthy)
    pub status: String,
    /// Number of indexed documents
    #[serde(default)]
    pub doc_count: u64,
    /// Number of stored vectors
    #[serde(default)]
    pub vector_count: u64,
}

impl HealthStatus {
    /// Whether the backend reports itself healthy
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Streaming chat backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Query the backend's health endpoint
    async fn health_check(&self) -> Result<HealthStatus, BackendError>;

    /// Open a streaming answer for `request`
    ///
    /// Resolves once response headers are in; the body is delivered through
    /// the returned stream. Dropping the stream closes the connection.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError>;
}

/// Document store collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List uploaded documents
    async fn list_documents(&self) -> Result<Vec<Document>, BackendError>;

    /// Upload a file for indexing
    ///
    /// A rejected upload is reported as [`BackendError::Status`] carrying the
    /// server's detail message.
    async fn upload_document(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<UploadReceipt, BackendError>;

    /// Delete a document, returning whether the backend accepted it
    async fn delete_document(&self, id: &str) -> bool;
}
