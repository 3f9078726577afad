//! Incremental, hash-addressed indexing pipeline.
//!
//! Startup order: scan the tree in sorted-path order, compute the corpus
//! hash, and probe the cache. On a hit the vector index is hydrated from
//! persisted records and no file is parsed. On a miss every file is
//! parsed into class/method chunks, summarized through the LLM callable
//! on a bounded worker pool, and written to the vector index; the cache
//! commits only after every index write succeeded, so a write failure
//! leaves the previous hash state untouched ("cache invalid" next time).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::cache::{CacheProbe, DocumentRecord, EmbeddingCache};
use crate::index::chunker::{self, ParsedFile};
use crate::index::hash::{FileHashTracker, corpus_hash};
use crate::index::similarity::{GraphNode, SimilarityGraph};
use crate::llm::{ChatRequest, LlmProvider, system_message, user_message};
use crate::vector::{
    CHUNK_TYPE_SUMMARY, Document, META_CHUNK_TYPE, META_FILENAME, META_PACKAGE, VectorIndex,
};

/// File extensions treated as indexable source.
const SOURCE_EXTENSIONS: &[&str] = &["java"];

/// Summarizer system prompt.
const SUMMARY_SYSTEM_PROMPT: &str = "You summarize source files for a retrieval index. \
     Reply with 2-4 sentences covering the file's responsibility, its key \
     classes and methods, and what it depends on. No markdown.";

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Whether the cache satisfied the run without parsing.
    pub cache_hit: bool,
    /// Files parsed in this run.
    pub files_processed: usize,
    /// Chunk documents written to the index.
    pub chunks_indexed: usize,
    /// File summaries written to the index.
    pub summaries_indexed: usize,
    /// Files skipped due to parse failures.
    pub parse_failures: usize,
    /// Summaries skipped due to LLM failures.
    pub summary_failures: usize,
    /// Files whose chunks were tombstoned.
    pub files_removed: usize,
    /// Corpus hash after the run.
    pub corpus_hash: String,
    /// Files classified as changed or new in an incremental run.
    pub changed_files: Vec<PathBuf>,
}

/// The incremental indexer. Sole writer of the hash tracker, the
/// embedding cache, and the similarity graph.
pub struct Indexer {
    index: Arc<dyn VectorIndex>,
    cache: EmbeddingCache,
    provider: Arc<dyn LlmProvider>,
    tracker: Mutex<FileHashTracker>,
    graph: Mutex<SimilarityGraph>,
    model: String,
    workers: usize,
    per_file_delay: std::time::Duration,
}

impl Indexer {
    /// Creates an indexer over the given index and provider.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            index,
            cache: EmbeddingCache::new(&config.cache_path, config.cache_enabled),
            provider,
            tracker: Mutex::new(FileHashTracker::new()),
            graph: Mutex::new(SimilarityGraph::new()),
            model: config.model.clone(),
            workers: config.indexer_workers.max(1),
            per_file_delay: config.per_file_delay,
        }
    }

    /// The embedding cache this indexer owns.
    #[must_use]
    pub const fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Similarity-graph statistics `(nodes, edges)`.
    #[must_use]
    pub fn graph_stats(&self) -> (usize, usize) {
        self.graph
            .lock()
            .map(|g| (g.node_count(), g.edge_count()))
            .unwrap_or((0, 0))
    }

    /// Scans a source tree, returning indexable paths in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when the root cannot be read. An empty
    /// or missing tree yields an empty list, not an error.
    pub fn scan_tree(root: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let mut paths = Vec::new();
        if !root.exists() {
            return Ok(paths);
        }
        collect_sources(root, &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    /// Full startup pass over a source tree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on unreadable files or index-write failure.
    /// Parse failures are skipped with a debug record and never fail the
    /// batch.
    pub async fn run_startup(&self, root: &Path) -> Result<IndexReport, EngineError> {
        let paths = Self::scan_tree(root)?;
        if paths.is_empty() {
            info!("source tree empty, nothing to index");
            return Ok(IndexReport::default());
        }

        let hash = corpus_hash(&paths)?;
        if self.cache.probe(&hash) == CacheProbe::Hit {
            let hydrated = self.hydrate_from_cache()?;
            info!(records = hydrated, hash = %hash, "cache hit, skipped re-indexing");
            return Ok(IndexReport {
                cache_hit: true,
                corpus_hash: hash,
                ..IndexReport::default()
            });
        }

        let (mut report, records) = self.process_files(&paths).await?;
        self.cache.commit(&hash, &records)?;
        report.corpus_hash = hash;
        Ok(report)
    }

    /// Incremental pass over candidate paths.
    ///
    /// Only `changed ∪ new` files are re-parsed; removed files have their
    /// chunks tombstoned from the vector index and similarity graph.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on unreadable files or index-write failure.
    pub async fn run_incremental(
        &self,
        candidates: Vec<PathBuf>,
    ) -> Result<IndexReport, EngineError> {
        let change_set = {
            let tracker = self.tracker.lock().map_err(|_| EngineError::Index {
                message: "hash tracker lock poisoned".to_string(),
            })?;
            tracker.classify_batch(&candidates)?
        };

        if change_set.is_noop() {
            debug!("incremental run is a no-op beyond hash reads");
            let hash = corpus_hash(&candidates)?;
            return Ok(IndexReport {
                cache_hit: true,
                corpus_hash: hash,
                ..IndexReport::default()
            });
        }

        let mut removed = 0_usize;
        for path in &change_set.removed {
            let filename = basename(path);
            self.index.remove_by_filename(&filename)?;
            if let Ok(mut tracker) = self.tracker.lock() {
                tracker.forget(path);
            }
            removed += 1;
        }

        let hash = corpus_hash(&candidates)?;
        let to_process = change_set.to_process();
        let (mut report, new_records) = self.process_files(&to_process).await?;

        // Carry forward cached records for untouched files so a later
        // warm restart hydrates the full corpus.
        let mut stale: std::collections::HashSet<String> = change_set
            .removed
            .iter()
            .chain(&to_process)
            .map(|p| basename(p))
            .collect();
        for record in &new_records {
            if let Some(name) = record.metadata.get(crate::vector::META_FILENAME) {
                stale.insert(name.clone());
            }
        }
        let mut merged: Vec<DocumentRecord> = self
            .cache
            .load_records()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| {
                r.metadata
                    .get(crate::vector::META_FILENAME)
                    .is_none_or(|name| !stale.contains(name))
            })
            .collect();
        merged.extend(new_records);
        self.cache.commit(&hash, &merged)?;

        report.files_removed = removed;
        report.changed_files = to_process;
        report.corpus_hash = hash;
        Ok(report)
    }

    /// Parses, summarizes, and indexes the given files. Returns the run
    /// report and the document records for the cache commit.
    async fn process_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<(IndexReport, Vec<DocumentRecord>), EngineError> {
        let mut report = IndexReport::default();
        let mut parsed_files: Vec<(PathBuf, String, ParsedFile)> = Vec::new();

        for path in paths {
            let content = std::fs::read_to_string(path)
                .map_err(|e| EngineError::io(path.display().to_string(), e))?;
            let filename = basename(path);
            match chunker::parse_source(&filename, &content) {
                Ok(parsed) => parsed_files.push((path.clone(), content, parsed)),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "parse failure, skipping file");
                    report.parse_failures += 1;
                }
            }
        }

        // Summaries fan out on a bounded worker pool with a per-file
        // throttle to respect provider rate limits.
        let summaries = self.summarize_files(&parsed_files).await;

        let mut documents: Vec<Document> = Vec::new();
        let mut records: Vec<DocumentRecord> = Vec::new();
        let mut graph_nodes: Vec<GraphNode> = Vec::new();

        for (i, (_, _, parsed)) in parsed_files.iter().enumerate() {
            // Re-adds for the same filename replace previous chunks.
            self.index.remove_by_filename(&parsed.filename)?;

            let chunks = chunker::chunk_documents(parsed);
            for (ordinal, doc) in chunks.iter().enumerate() {
                let chunk_type = doc.meta(META_CHUNK_TYPE).unwrap_or("chunk");
                let id = format!("{}#{}#{}", parsed.filename, chunk_type, ordinal);
                records.push(DocumentRecord {
                    id: id.clone(),
                    text: doc.text.clone(),
                    embedding: Vec::new(),
                    metadata: doc.metadata.clone(),
                });
                graph_nodes.push(GraphNode {
                    id,
                    content: doc.text.clone(),
                    node_type: chunk_type.to_string(),
                });
            }
            report.chunks_indexed += chunks.len();
            documents.extend(chunks);

            if let Some(Some(summary)) = summaries.get(i) {
                let doc = Document::new(
                    summary.clone(),
                    [
                        (META_FILENAME, parsed.filename.as_str()),
                        (META_CHUNK_TYPE, CHUNK_TYPE_SUMMARY),
                        (
                            META_PACKAGE,
                            parsed.package.as_deref().unwrap_or_default(),
                        ),
                    ],
                );
                records.push(DocumentRecord {
                    id: format!("{}#{}#0", parsed.filename, CHUNK_TYPE_SUMMARY),
                    text: doc.text.clone(),
                    embedding: Vec::new(),
                    metadata: doc.metadata.clone(),
                });
                documents.push(doc);
                report.summaries_indexed += 1;
            } else {
                report.summary_failures += 1;
            }
        }

        // An index-write failure aborts the job before any hash is
        // recorded, guaranteeing "cache invalid" on the next startup.
        self.index.add(documents)?;

        {
            let mut graph = self.graph.lock().map_err(|_| EngineError::Index {
                message: "similarity graph lock poisoned".to_string(),
            })?;
            graph.update(graph_nodes);
        }

        {
            let mut tracker = self.tracker.lock().map_err(|_| EngineError::Index {
                message: "hash tracker lock poisoned".to_string(),
            })?;
            for (path, content, _) in &parsed_files {
                tracker.record(path, content.as_bytes());
            }
        }

        report.files_processed = parsed_files.len();
        Ok((report, records))
    }

    /// Summarizes each parsed file through the LLM callable.
    ///
    /// Returns one entry per input file, `None` where the provider
    /// failed; failures never abort the batch.
    async fn summarize_files(
        &self,
        files: &[(PathBuf, String, ParsedFile)],
    ) -> Vec<Option<String>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(files.len());

        for (_, content, parsed) in files {
            let sem = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let model = self.model.clone();
            let delay = self.per_file_delay;
            let filename = parsed.filename.clone();
            let excerpt = chunker::truncate_for_summary(content).to_string();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return None;
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let request = ChatRequest {
                    model,
                    messages: vec![
                        system_message(SUMMARY_SYSTEM_PROMPT),
                        user_message(&format!("File: {filename}\n\n{excerpt}")),
                    ],
                    temperature: Some(0.0),
                    max_tokens: Some(256),
                    json_mode: false,
                    stream: false,
                    tool_names: Vec::new(),
                };
                match provider.chat(&request).await {
                    Ok(response) => Some(response.content),
                    Err(e) => {
                        warn!(file = %filename, error = %e, "summary generation failed");
                        None
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or(None));
        }
        results
    }

    fn hydrate_from_cache(&self) -> Result<usize, EngineError> {
        let records = self.cache.load_records()?;
        let count = records.len();
        if self.index.is_empty() {
            let documents: Vec<Document> = records.into_iter().map(Document::from).collect();
            self.index.add(documents)?;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("provider", &self.provider.name())
            .field("workers", &self.workers)
            .finish()
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| EngineError::io(dir.display().to_string(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(dir.display().to_string(), e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
        {
            out.push(path);
        }
    }
    Ok(())
}
