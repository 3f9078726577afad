//! File hash tracking and corpus digests.
//!
//! Per-file MD5 hashes with bounded history drive the incremental
//! indexer's `new | changed | unchanged` classification. The corpus-wide
//! SHA-256 digest over file bytes in sorted-path order is the cache
//! validity key: stable under directory-listing permutations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::Digest as Md5Digest;
use md5::Md5;
use sha2::Sha256;

use crate::error::EngineError;

/// Maximum hash-history entries retained per file.
const MAX_HISTORY: usize = 8;

/// Classification of a candidate file against the tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Hash matches the last recorded value.
    Unchanged,
    /// Hash differs from the last recorded value.
    Changed,
    /// No hash recorded for this path.
    New,
}

/// One recorded hash observation.
#[derive(Debug, Clone)]
pub struct FileHashRecord {
    /// File path.
    pub path: PathBuf,
    /// Hex MD5 of the file contents.
    pub md5: String,
    /// Unix millis when the hash was recorded.
    pub timestamp: u64,
}

/// Result of classifying a batch of candidate paths.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Paths seen for the first time.
    pub new: Vec<PathBuf>,
    /// Paths whose content hash changed.
    pub changed: Vec<PathBuf>,
    /// Paths whose content hash is unchanged.
    pub unchanged: Vec<PathBuf>,
    /// Tracked paths absent from the candidate list.
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    /// Paths requiring re-parse: `changed ∪ new`, sorted.
    #[must_use]
    pub fn to_process(&self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.changed.iter().chain(&self.new).cloned().collect();
        all.sort();
        all
    }

    /// Returns `true` when nothing changed at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Tracks per-file content hashes with bounded history.
///
/// The incremental indexer is the sole writer; reads are snapshots.
#[derive(Debug, Default)]
pub struct FileHashTracker {
    current: BTreeMap<PathBuf, FileHashRecord>,
    history: BTreeMap<PathBuf, Vec<FileHashRecord>>,
}

impl FileHashTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies content bytes for a path without recording them.
    #[must_use]
    pub fn classify(&self, path: &Path, contents: &[u8]) -> FileState {
        let digest = md5_hex(contents);
        match self.current.get(path) {
            None => FileState::New,
            Some(record) if record.md5 == digest => FileState::Unchanged,
            Some(_) => FileState::Changed,
        }
    }

    /// Records the current hash for a path, pushing the previous value
    /// into bounded history.
    pub fn record(&mut self, path: &Path, contents: &[u8]) {
        let record = FileHashRecord {
            path: path.to_path_buf(),
            md5: md5_hex(contents),
            timestamp: now_millis(),
        };
        if let Some(previous) = self.current.insert(path.to_path_buf(), record) {
            let entries = self.history.entry(path.to_path_buf()).or_default();
            entries.push(previous);
            if entries.len() > MAX_HISTORY {
                entries.remove(0);
            }
        }
    }

    /// Forgets a path entirely (removed file).
    pub fn forget(&mut self, path: &Path) {
        self.current.remove(path);
        self.history.remove(path);
    }

    /// Classifies a candidate batch and detects removed files.
    ///
    /// Does not mutate tracker state; callers record hashes after a
    /// successful reindex so failures leave the tracker untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when a candidate file cannot be read.
    pub fn classify_batch(&self, candidates: &[PathBuf]) -> Result<ChangeSet, EngineError> {
        let mut set = ChangeSet::default();
        for path in candidates {
            let contents = std::fs::read(path)
                .map_err(|e| EngineError::io(path.display().to_string(), e))?;
            match self.classify(path, &contents) {
                FileState::New => set.new.push(path.clone()),
                FileState::Changed => set.changed.push(path.clone()),
                FileState::Unchanged => set.unchanged.push(path.clone()),
            }
        }
        let candidate_set: std::collections::HashSet<&PathBuf> = candidates.iter().collect();
        set.removed = self
            .current
            .keys()
            .filter(|p| !candidate_set.contains(p))
            .cloned()
            .collect();
        Ok(set)
    }

    /// Current record for a path.
    #[must_use]
    pub fn current(&self, path: &Path) -> Option<&FileHashRecord> {
        self.current.get(path)
    }

    /// Hash history for a path, oldest first.
    #[must_use]
    pub fn history(&self, path: &Path) -> &[FileHashRecord] {
        self.history.get(path).map_or(&[], Vec::as_slice)
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Returns `true` when no files are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Hex MD5 of a byte slice.
#[must_use]
pub fn md5_hex(contents: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(contents);
    hex::encode(hasher.finalize())
}

/// Corpus hash: SHA-256 over each file's full bytes concatenated in
/// sorted-path order. Stable under listing permutations.
///
/// # Errors
///
/// Returns [`EngineError::Io`] when any file cannot be read.
pub fn corpus_hash(paths: &[PathBuf]) -> Result<String, EngineError> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for path in sorted {
        let contents =
            std::fs::read(path).map_err(|e| EngineError::io(path.display().to_string(), e))?;
        hasher.update(&contents);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Corpus hash over in-memory `(path, bytes)` pairs, sorted by path.
///
/// Same digest as [`corpus_hash`] for identical content; used by tests
/// and the watcher's pre-read path.
#[must_use]
pub fn corpus_hash_of(entries: &[(PathBuf, Vec<u8>)]) -> String {
    let mut sorted: Vec<&(PathBuf, Vec<u8>)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (_, contents) in sorted {
        hasher.update(contents);
    }
    hex::encode(hasher.finalize())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
