//! Indexing subsystem.
//!
//! An incremental, hash-addressed pipeline that keeps summaries, chunks,
//! and a similarity graph in sync with a source tree:
//!
//! ```text
//! source tree → hash tracker → chunker → indexer ─┬→ vector index
//!                                                 ├→ similarity graph
//!                                                 └→ embedding cache
//!        file watcher (debounce + settle) ────────┘
//! ```

pub mod cache;
pub mod chunker;
pub mod hash;
pub mod indexer;
pub mod similarity;
pub mod watcher;

pub use cache::{CacheMarker, CacheProbe, DocumentRecord, EmbeddingCache};
pub use chunker::{ParsedClass, ParsedFile, ParsedMethod, chunk_documents, parse_source};
pub use hash::{ChangeSet, FileHashRecord, FileHashTracker, FileState, corpus_hash};
pub use indexer::{IndexReport, Indexer};
pub use similarity::{GraphEdge, GraphNode, SimilarityGraph};
pub use watcher::{ChangeKind, EventCoalescer, FileWatcher, PendingChanges};
