//! HTTP Backend Implementation
//!
//! Talks to the knowledge-base REST API.
//!
//! # Endpoints
//!
//! - `POST {base}/chat/stream` - streaming answer (`text/event-stream`)
//! - `GET {base}/documents` - list documents
//! - `POST {base}/documents/upload` - multipart upload, field `file`
//! - `DELETE {base}/documents/{id}` - delete a document
//! - `GET {base}/health` - health report
//!
//! Only the connect phase of a streaming request is bounded by a timeout; a
//! long answer may legitimately stream for minutes. Idle detection is the
//! controller's job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::traits::{ByteStream, ChatBackend, DocumentStore, HealthStatus};
use crate::config::ClientConfig;
use crate::documents::{Document, UploadReceipt};
use crate::error::BackendError;
use crate::messages::ChatRequest;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// HTTP client for the knowledge-base backend
#[derive(Clone)]
pub struct HttpBackend {
    /// Base URL, without trailing slash
    base_url: String,
    /// Timeout for non-streaming calls
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend for `base_url`
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            base_url,
            request_timeout,
            http_client,
        })
    }

    /// Create from loaded configuration
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BackendError> {
        Self::new(
            config.base_url.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Turn a non-2xx response into [`BackendError::Status`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(BackendError::Status {
        status: status.as_u16(),
        detail,
    })
}

/// Extract a human-readable message from an error body
///
/// Prefers a string `detail` field, falls back to the raw body.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return Some(detail.to_string());
        }
    }
    Some(body.to_string())
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct DocumentInfo {
    doc_id: String,
    filename: String,
    #[serde(default)]
    chunk_count: u32,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<DocumentInfo> for Document {
    fn from(info: DocumentInfo) -> Self {
        let uploaded_at = info
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Self {
            id: info.doc_id,
            filename: info.filename,
            chunk_count: info.chunk_count,
            uploaded_at,
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    doc_id: String,
    chunk_count: u32,
}

/// Parse RFC 3339 or a naive ISO timestamp (assumed UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "Unparseable document timestamp");
            None
        }
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl ChatBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        let response = self
            .http_client
            .get(self.url("health"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        tracing::debug!(
            url = %self.url("chat/stream"),
            history = request.history.len(),
            doc_ids = request.doc_ids.len(),
            "Opening answer stream"
        );

        let response = self
            .http_client
            .post(self.url("chat/stream"))
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackendError::from))
            .boxed())
    }
}

#[async_trait]
impl DocumentStore for HttpBackend {
    async fn list_documents(&self) -> Result<Vec<Document>, BackendError> {
        let response = self
            .http_client
            .get(self.url("documents"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let infos: Vec<DocumentInfo> = response.json().await?;
        Ok(infos.into_iter().map(Document::from).collect())
    }

    async fn upload_document(
        &self,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<UploadReceipt, BackendError> {
        let part = reqwest::multipart::Part::bytes(contents).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(self.url("documents/upload"))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;
        let upload: UploadResponse = response.json().await?;

        Ok(UploadReceipt {
            id: upload.doc_id,
            chunk_count: upload.chunk_count,
        })
    }

    async fn delete_document(&self, id: &str) -> bool {
        let result = self
            .http_client
            .delete(self.url(&format!("documents/{id}")))
            .timeout(self.request_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(doc_id = %id, status = %response.status(), "Document delete rejected");
                false
            }
            Err(e) => {
                tracing::warn!(doc_id = %id, error = %e, "Document delete failed");
                false
            }
        }
    }
}
