//! Documents and the vector-index seam.
//!
//! The real vector store is an external collaborator; the engine only
//! relies on the [`VectorIndex`] contract. [`InMemoryVectorIndex`] is the
//! in-process implementation: it scores by lexical token overlap, which
//! keeps retrieval deterministic and testable without an embedding
//! provider.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Metadata key for the originating filename.
pub const META_FILENAME: &str = "filename";
/// Metadata key for the chunk type.
pub const META_CHUNK_TYPE: &str = "chunk_type";
/// Metadata key for the containing class.
pub const META_CLASS: &str = "class";
/// Metadata key for the method name.
pub const META_METHOD: &str = "method";
/// Metadata key for the package.
pub const META_PACKAGE: &str = "package";

/// Chunk type value for class-overview documents.
pub const CHUNK_TYPE_CLASS: &str = "class_overview";
/// Chunk type value for method-implementation documents.
pub const CHUNK_TYPE_METHOD: &str = "method_implementation";
/// Chunk type value for per-file summaries.
pub const CHUNK_TYPE_SUMMARY: &str = "file-summary";

/// A document stored in a vector index.
///
/// Chunk documents carry `filename` and `chunk_type` metadata, plus
/// `class`/`method`/`package` where applicable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document text.
    pub text: String,
    /// String metadata. `BTreeMap` keeps serialized records stable.
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Creates a document with the given text and metadata pairs.
    #[must_use]
    pub fn new<I, K, V>(text: impl Into<String>, metadata: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            text: text.into(),
            metadata: metadata
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns a metadata value by key.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Returns the filename this document came from, if recorded.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.meta(META_FILENAME)
    }
}

/// A scored hit from a similarity search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched document.
    pub document: Document,
    /// Lexical similarity score in `[0, 1]`.
    pub score: f64,
}

/// Nearest-neighbor lookup over documents.
///
/// `add` must be idempotent in effect for re-adds of the same metadata
/// keys: duplication is tolerated but not desired. Implementations are
/// entry-level thread safe; calls may block (the external store is a
/// network service).
pub trait VectorIndex: Send + Sync {
    /// Adds documents to the index.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Index`] when the underlying store rejects
    /// the write.
    fn add(&self, documents: Vec<Document>) -> Result<(), EngineError>;

    /// Returns the `top_k` most similar documents to `query`,
    /// score-descending.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Index`] when the underlying store fails.
    fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, EngineError>;

    /// Removes all documents whose `filename` metadata matches.
    ///
    /// Tombstoning path for deleted source files.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Index`] when the underlying store fails.
    fn remove_by_filename(&self, filename: &str) -> Result<usize, EngineError>;

    /// Number of documents currently indexed.
    fn len(&self) -> usize;

    /// Returns `true` when the index holds no documents.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every document.
    fn clear(&self);
}

/// Lowercased word tokens of a text.
fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Token-overlap score of a query against a document: the fraction of
/// query tokens present in the document, weighted toward full coverage.
fn overlap_score(query_tokens: &HashSet<String>, doc_tokens: &HashSet<String>) -> f64 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let hit = query_tokens.intersection(doc_tokens).count() as f64;
    #[allow(clippy::cast_precision_loss)]
    let coverage = hit / query_tokens.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let jaccard = hit / (query_tokens.len() + doc_tokens.len()) as f64;
    (0.8 * coverage + 0.2 * jaccard).min(1.0)
}

/// Process-local vector index scoring by lexical token overlap.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document, in insertion order.
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().map(|d| d.clone()).unwrap_or_default()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn add(&self, documents: Vec<Document>) -> Result<(), EngineError> {
        let mut guard = self.documents.write().map_err(|_| EngineError::Index {
            message: "index lock poisoned".to_string(),
        })?;
        guard.extend(documents);
        Ok(())
    }

    fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, EngineError> {
        let query_tokens = tokens(query);
        let guard = self.documents.read().map_err(|_| EngineError::Index {
            message: "index lock poisoned".to_string(),
        })?;

        let mut hits: Vec<SearchHit> = guard
            .iter()
            .map(|doc| SearchHit {
                score: overlap_score(&query_tokens, &tokens(&doc.text)),
                document: doc.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn remove_by_filename(&self, filename: &str) -> Result<usize, EngineError> {
        let mut guard = self.documents.write().map_err(|_| EngineError::Index {
            message: "index lock poisoned".to_string(),
        })?;
        let before = guard.len();
        guard.retain(|doc| doc.filename() != Some(filename));
        Ok(before - guard.len())
    }

    fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.documents.write() {
            guard.clear();
        }
    }
}
