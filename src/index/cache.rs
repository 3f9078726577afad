//! Hash-addressed embedding cache.
//!
//! On-disk layout under the cache directory:
//!
//! - `embeddings.json`: marker `{cached_at, hash, status}`; presence with
//!   a matching hash means the corpus is already indexed.
//! - `documents.hash`: ASCII hex of the sorted-file-set SHA-256.
//! - `records.jsonl`: one JSON record `{id, text, embedding, metadata}`
//!   per line, enough to hydrate the vector index without re-summarizing.
//!
//! Any corruption (missing file, bad JSON, hash mismatch) is reported as
//! "cache invalid" and triggers a clean rebuild; the cache never fails a
//! startup.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::vector::Document;

/// Marker file name.
const MARKER_FILE: &str = "embeddings.json";
/// Corpus hash file name.
const HASH_FILE: &str = "documents.hash";
/// Document records file name.
const RECORDS_FILE: &str = "records.jsonl";
/// Marker status value for a complete index.
const STATUS_VALID: &str = "valid";

/// The cache marker persisted as `embeddings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMarker {
    /// Unix millis when the cache was written.
    pub cached_at: i64,
    /// Corpus hash the cache was built from.
    pub hash: String,
    /// `"valid"` for a complete index.
    pub status: String,
}

/// One persisted document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable record id (`filename#chunk_type#ordinal`).
    pub id: String,
    /// Document text.
    pub text: String,
    /// Embedding vector; empty when the index is lexical.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Document metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Outcome of a cache validity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProbe {
    /// Marker present, hash matches: reuse.
    Hit,
    /// Marker absent or hash mismatch: rebuild.
    Miss,
}

/// Content-addressed on-disk cache of an indexed corpus.
#[derive(Debug)]
pub struct EmbeddingCache {
    dir: PathBuf,
    enabled: bool,
}

impl EmbeddingCache {
    /// Creates a cache rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Marker file path.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// Corpus hash file path.
    #[must_use]
    pub fn hash_path(&self) -> PathBuf {
        self.dir.join(HASH_FILE)
    }

    /// Records file path.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    /// Probes validity for a corpus hash.
    ///
    /// A disabled cache always misses. A corrupt marker is a miss with a
    /// warning, never an error.
    #[must_use]
    pub fn probe(&self, corpus_hash: &str) -> CacheProbe {
        if !self.enabled {
            return CacheProbe::Miss;
        }
        let marker = match self.read_marker() {
            Ok(Some(marker)) => marker,
            Ok(None) => return CacheProbe::Miss,
            Err(e) => {
                warn!(error = %e, "cache marker unreadable, treating as invalid");
                return CacheProbe::Miss;
            }
        };
        let stored_hash = match self.read_hash() {
            Ok(Some(hash)) => hash,
            Ok(None) => return CacheProbe::Miss,
            Err(e) => {
                warn!(error = %e, "hash file unreadable, treating as invalid");
                return CacheProbe::Miss;
            }
        };
        if marker.status == STATUS_VALID && marker.hash == corpus_hash && stored_hash == corpus_hash
        {
            CacheProbe::Hit
        } else {
            debug!(
                marker_hash = %marker.hash,
                stored_hash = %stored_hash,
                corpus_hash = %corpus_hash,
                "cache hash mismatch"
            );
            CacheProbe::Miss
        }
    }

    /// Persists the marker, hash file, and document records after a
    /// successful indexing run.
    ///
    /// Records are written first so a crash mid-commit leaves no valid
    /// marker pointing at incomplete records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] on any write failure; the caller must
    /// leave the previous hash file state untouched in that case (this
    /// method writes the marker last).
    pub fn commit(
        &self,
        corpus_hash: &str,
        records: &[DocumentRecord],
    ) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::io(self.dir.display().to_string(), e))?;

        let records_path = self.records_path();
        let mut out = Vec::with_capacity(records.len() * 128);
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| EngineError::CacheInvalid {
                reason: format!("record serialization failed: {e}"),
            })?;
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        write_atomic(&records_path, &out)?;

        write_atomic(&self.hash_path(), corpus_hash.as_bytes())?;

        let marker = CacheMarker {
            cached_at: now_millis(),
            hash: corpus_hash.to_string(),
            status: STATUS_VALID.to_string(),
        };
        let marker_json =
            serde_json::to_vec_pretty(&marker).map_err(|e| EngineError::CacheInvalid {
                reason: format!("marker serialization failed: {e}"),
            })?;
        write_atomic(&self.marker_path(), &marker_json)?;
        debug!(records = records.len(), hash = %corpus_hash, "cache committed");
        Ok(())
    }

    /// Loads persisted document records for index hydration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CacheInvalid`] when the records file is
    /// missing or any line fails to parse.
    pub fn load_records(&self) -> Result<Vec<DocumentRecord>, EngineError> {
        let path = self.records_path();
        let file = fs::File::open(&path).map_err(|e| EngineError::CacheInvalid {
            reason: format!("records file unreadable at {}: {e}", path.display()),
        })?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| EngineError::CacheInvalid {
                reason: format!("records read failed at line {lineno}: {e}"),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: DocumentRecord =
                serde_json::from_str(&line).map_err(|e| EngineError::CacheInvalid {
                    reason: format!("records parse failed at line {lineno}: {e}"),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Clears the marker so the next startup rebuilds.
    ///
    /// The watcher calls this before scheduling a reindex. Hash and
    /// record files are left for diagnostics.
    pub fn invalidate(&self) {
        if let Err(e) = fs::remove_file(self.marker_path())
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, "failed to clear cache marker");
        }
    }

    fn read_marker(&self) -> Result<Option<CacheMarker>, EngineError> {
        let path = self.marker_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(path.display().to_string(), e)),
        };
        let marker =
            serde_json::from_slice(&bytes).map_err(|e| EngineError::CacheInvalid {
                reason: format!("marker parse failed: {e}"),
            })?;
        Ok(Some(marker))
    }

    fn read_hash(&self) -> Result<Option<String>, EngineError> {
        let path = self.hash_path();
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(path.display().to_string(), e)),
        }
    }
}

/// Converts a persisted record back into an index document.
impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        Self {
            text: record.text,
            metadata: record.metadata,
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let tmp = path.with_extension("tmp");
    let mut file =
        fs::File::create(&tmp).map_err(|e| EngineError::io(tmp.display().to_string(), e))?;
    file.write_all(bytes)
        .map_err(|e| EngineError::io(tmp.display().to_string(), e))?;
    file.sync_all()
        .map_err(|e| EngineError::io(tmp.display().to_string(), e))?;
    fs::rename(&tmp, path).map_err(|e| EngineError::io(path.display().to_string(), e))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<DocumentRecord> {
        vec![
            DocumentRecord {
                id: "A.java#file-summary#0".to_string(),
                text: "Summary of A".to_string(),
                embedding: Vec::new(),
                metadata: BTreeMap::from([
                    ("filename".to_string(), "A.java".to_string()),
                    ("chunk_type".to_string(), "file-summary".to_string()),
                ]),
            },
            DocumentRecord {
                id: "A.java#method_implementation#1".to_string(),
                text: "void run() { work(); }".to_string(),
                embedding: vec![0.1, 0.2],
                metadata: BTreeMap::from([
                    ("filename".to_string(), "A.java".to_string()),
                    ("chunk_type".to_string(), "method_implementation".to_string()),
                ]),
            },
        ]
    }

    #[test]
    fn test_probe_empty_dir_misses() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), true);
        assert_eq!(cache.probe("abc"), CacheProbe::Miss);
    }

    #[test]
    fn test_commit_then_probe_hits() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), true);
        cache
            .commit("deadbeef", &sample_records())
            .unwrap_or_else(|e| unreachable!("commit: {e}"));
        assert_eq!(cache.probe("deadbeef"), CacheProbe::Hit);
        assert_eq!(cache.probe("cafebabe"), CacheProbe::Miss);
    }

    #[test]
    fn test_load_records_round_trip() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), true);
        let records = sample_records();
        cache
            .commit("deadbeef", &records)
            .unwrap_or_else(|e| unreachable!("commit: {e}"));
        let loaded = cache
            .load_records()
            .unwrap_or_else(|e| unreachable!("load: {e}"));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, records[0].id);
        assert_eq!(loaded[1].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_invalidate_clears_marker_only() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), true);
        cache
            .commit("deadbeef", &sample_records())
            .unwrap_or_else(|e| unreachable!("commit: {e}"));
        cache.invalidate();
        assert_eq!(cache.probe("deadbeef"), CacheProbe::Miss);
        // Records survive for diagnostics.
        assert!(cache.records_path().exists());
    }

    #[test]
    fn test_corrupt_marker_is_miss_not_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), true);
        fs::create_dir_all(dir.path()).unwrap_or_else(|e| unreachable!("mkdir: {e}"));
        fs::write(cache.marker_path(), b"{ not json")
            .unwrap_or_else(|e| unreachable!("write: {e}"));
        assert_eq!(cache.probe("abc"), CacheProbe::Miss);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let cache = EmbeddingCache::new(dir.path(), false);
        cache
            .commit("deadbeef", &sample_records())
            .unwrap_or_else(|e| unreachable!("commit: {e}"));
        assert_eq!(cache.probe("deadbeef"), CacheProbe::Miss);
    }

    #[test]
    fn test_record_to_document() {
        let record = sample_records().remove(0);
        let doc: Document = record.into();
        assert_eq!(doc.filename(), Some("A.java"));
        assert_eq!(doc.text, "Summary of A");
    }
}
