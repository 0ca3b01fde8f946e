//! Document Library
//!
//! Client-side view of the uploaded documents and of which ones a query
//! should be answered from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded document known to the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Backend-assigned identifier
    pub id: String,
    /// Original file name
    pub filename: String,
    /// Number of indexed chunks
    pub chunk_count: u32,
    /// When the document was uploaded
    pub uploaded_at: DateTime<Utc>,
}

/// Result of a successful upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Backend-assigned identifier
    pub id: String,
    /// Number of indexed chunks
    pub chunk_count: u32,
}

/// Which documents the user wants answers drawn from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Every uploaded document
    #[default]
    All,
    /// Only the selected documents
    Selected,
}

/// Effective scope sent with a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentScope {
    /// No restriction
    All,
    /// Exactly these document IDs, in selection order
    Subset(Vec<String>),
}

impl DocumentScope {
    /// Value for the request's `doc_ids` field (empty = all)
    #[must_use]
    pub fn doc_ids(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Subset(ids) => ids.clone(),
        }
    }
}

/// Known documents plus the user's selection
#[derive(Clone, Debug, Default)]
pub struct DocumentLibrary {
    documents: Vec<Document>,
    selected: Vec<String>,
    mode: ScopeMode,
}

impl DocumentLibrary {
    /// Create an empty library (scope: all documents)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document and select it
    pub fn add(&mut self, document: Document) {
        if !self.selected.contains(&document.id) {
            self.selected.push(document.id.clone());
        }
        self.documents.retain(|d| d.id != document.id);
        self.documents.push(document);
    }

    /// Remove a document and drop it from the selection
    ///
    /// Returns the removed document, if it was known.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.selected.retain(|s| s != id);
        let idx = self.documents.iter().position(|d| d.id == id)?;
        Some(self.documents.remove(idx))
    }

    /// Flip selection of a known document
    ///
    /// Returns the new selection state, or `None` for an unknown ID.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        if !self.documents.iter().any(|d| d.id == id) {
            tracing::debug!(doc_id = %id, "Ignoring toggle of unknown document");
            return None;
        }
        if let Some(idx) = self.selected.iter().position(|s| s == id) {
            self.selected.remove(idx);
            Some(false)
        } else {
            self.selected.push(id.to_string());
            Some(true)
        }
    }

    /// Replace the document list after a refresh
    ///
    /// Selections of documents that no longer exist are dropped.
    pub fn replace_all(&mut self, documents: Vec<Document>) {
        self.selected
            .retain(|id| documents.iter().any(|d| &d.id == id));
        self.documents = documents;
    }

    /// Set the scope mode
    pub fn set_mode(&mut self, mode: ScopeMode) {
        self.mode = mode;
    }

    /// Current scope mode
    #[must_use]
    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// The scope a query submitted now would use
    #[must_use]
    pub fn effective_scope(&self) -> DocumentScope {
        match self.mode {
            ScopeMode::All => DocumentScope::All,
            ScopeMode::Selected => DocumentScope::Subset(self.selected.clone()),
        }
    }

    /// Known documents
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Selected document IDs, in selection order
    #[must_use]
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    /// Whether a document is selected
    #[must_use]
    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.iter().any(|s| s == id)
    }
}
