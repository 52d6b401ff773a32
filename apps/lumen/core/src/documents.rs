//! Open-document tracking
//!
//! The store holds one [`TrackedDocument`] per open URI. Documents are shared
//! as `Arc`s and mutated in place, so an extension that keeps a reference (or
//! keys a table by pointer) keeps seeing the live document across updates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::types::LspRange;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// One content change as reported by the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentContentChange {
    /// Replaced range; None means the whole document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<LspRange>,
    pub text: String,
}

/// An open document
#[derive(Debug)]
pub struct TrackedDocument {
    uri: String,
    language_id: RwLock<String>,
    version: AtomicI32,
    text: RwLock<String>,
}

impl TrackedDocument {
    fn new(uri: &str, language_id: &str, version: i32, text: &str) -> Self {
        Self {
            uri: uri.to_string(),
            language_id: RwLock::new(language_id.to_string()),
            version: AtomicI32::new(version),
            text: RwLock::new(text.to_string()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn language_id(&self) -> String {
        read(&self.language_id).clone()
    }

    pub fn version(&self) -> i32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn text(&self) -> String {
        read(&self.text).clone()
    }

    pub fn line_count(&self) -> usize {
        read(&self.text).lines().count().max(1)
    }

    /// Text of one line without its terminator
    pub fn line_at(&self, line: usize) -> Option<String> {
        read(&self.text).lines().nth(line).map(str::to_string)
    }

    fn snapshot(&self) -> ClosedDocument {
        ClosedDocument {
            uri: self.uri.clone(),
            language_id: self.language_id(),
            version: self.version(),
            text: self.text(),
        }
    }
}

/// Frozen view of a document handed to close listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedDocument {
    uri: String,
    language_id: String,
    version: i32,
    text: String,
}

impl ClosedDocument {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Result of `did_open`
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    /// The URI was not tracked before; an open event should fire
    Opened(Arc<TrackedDocument>),
    /// The URI was already open and has been updated in place
    Updated(Arc<TrackedDocument>),
}

impl OpenOutcome {
    pub fn document(&self) -> &Arc<TrackedDocument> {
        match self {
            OpenOutcome::Opened(doc) | OpenOutcome::Updated(doc) => doc,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, OpenOutcome::Opened(_))
    }
}

/// Table of open documents keyed by URI
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, Arc<TrackedDocument>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a document. Re-opening an open URI updates it in place.
    pub fn did_open(&self, uri: &str, language_id: &str, text: &str, version: i32) -> OpenOutcome {
        let mut documents = write(&self.documents);

        if let Some(existing) = documents.get(uri) {
            debug!("Document {} already open, updating in place", uri);
            *write(&existing.language_id) = language_id.to_string();
            *write(&existing.text) = text.to_string();
            let next = version.max(existing.version().saturating_add(1));
            existing.version.store(next, Ordering::SeqCst);
            return OpenOutcome::Updated(existing.clone());
        }

        let doc = Arc::new(TrackedDocument::new(uri, language_id, version, text));
        documents.insert(uri.to_string(), doc.clone());
        OpenOutcome::Opened(doc)
    }

    /// Replace the text of a tracked document and bump its version.
    /// Returns None (and does nothing) for untracked URIs.
    pub fn did_change(&self, uri: &str, new_text: &str) -> Option<Arc<TrackedDocument>> {
        let documents = read(&self.documents);
        let Some(doc) = documents.get(uri) else {
            debug!("didChange for untracked document {}, ignoring", uri);
            return None;
        };

        *write(&doc.text) = new_text.to_string();
        let _ = doc
            .version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_add(1)));
        Some(doc.clone())
    }

    /// Forget a document, returning a frozen view of its last state
    pub fn did_close(&self, uri: &str) -> Option<ClosedDocument> {
        let removed = write(&self.documents).remove(uri);
        if removed.is_none() {
            debug!("didClose for untracked document {}, ignoring", uri);
        }
        removed.map(|doc| doc.snapshot())
    }

    pub fn get(&self, uri: &str) -> Option<Arc<TrackedDocument>> {
        read(&self.documents).get(uri).cloned()
    }

    pub fn contains(&self, uri: &str) -> bool {
        read(&self.documents).contains_key(uri)
    }

    /// All open documents, ordered by URI
    pub fn all(&self) -> Vec<Arc<TrackedDocument>> {
        let mut docs: Vec<_> = read(&self.documents).values().cloned().collect();
        docs.sort_by(|a, b| a.uri.cmp(&b.uri));
        docs
    }

    pub fn len(&self) -> usize {
        read(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
