//! Key-value document sink consumed by projection builders.
//!
//! Documents are JSON objects addressed by `(collection, id)`. A
//! [`WriteMode::Merge`] write deep-merges object fields into the stored
//! document; arrays and scalars are replaced wholesale.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::Result;

/// A stored read-model document.
pub type Document = Map<String, Value>;

/// How [`DocumentSink::set`] treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the document.
    Replace,
    /// Upsert: merge fields into the existing document, creating it if absent.
    Merge,
}

/// Document storage used by projections.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn set(&self, collection: &str, id: &str, document: Document, mode: WriteMode)
        -> Result<()>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Every document in a collection, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>>;

    fn name(&self) -> &'static str;
}

/// Deep-merge `patch` into `target`.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_documents(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Sink
// ═══════════════════════════════════════════════════════════════════════════════

/// Concurrent in-memory document sink.
#[derive(Debug, Default)]
pub struct InMemoryDocumentSink {
    documents: DashMap<(String, String), Document>,
}

impl InMemoryDocumentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentSink for InMemoryDocumentSink {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .get(&(collection.to_string(), id.to_string()))
            .map(|doc| doc.value().clone()))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        document: Document,
        mode: WriteMode,
    ) -> Result<()> {
        trace!(collection, id, ?mode, "Writing document");
        let key = (collection.to_string(), id.to_string());
        match mode {
            WriteMode::Replace => {
                self.documents.insert(key, document);
            }
            WriteMode::Merge => {
                merge_documents(&mut self.documents.entry(key).or_default(), document);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self
            .documents
            .remove(&(collection.to_string(), id.to_string()))
            .is_some())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let mut documents: Vec<(String, Document)> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
