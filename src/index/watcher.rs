//! Real-time file watching with debounce and settle.
//!
//! One long-lived task drains the watch-event channel; each reindex cycle
//! is a short-lived awaited call. Debouncing is a per-path timestamp map
//! (repeated events for one path within the debounce window are dropped);
//! after the last accepted event, a settle wait elapses before the cache
//! marker is cleared and the incremental indexer and graph calculator run.
//! Watch errors are logged and never poison future events.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::indexer::{IndexReport, Indexer};

/// Kind of filesystem change, collapsed from notify's event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Content of an existing file changed.
    Modified,
    /// A file appeared.
    Created,
    /// A file disappeared.
    Deleted,
}

/// The three pending sets accumulated between reindex cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    /// Modified paths.
    pub modified: HashSet<PathBuf>,
    /// Newly created paths.
    pub created: HashSet<PathBuf>,
    /// Deleted paths.
    pub deleted: HashSet<PathBuf>,
}

impl PendingChanges {
    /// Returns `true` when no changes are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.created.is_empty() && self.deleted.is_empty()
    }

    /// Total pending path count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modified.len() + self.created.len() + self.deleted.len()
    }
}

/// Per-path debouncer and pending-set accumulator.
///
/// Pure state machine over injected timestamps, so it is testable without
/// a real filesystem watcher.
#[derive(Debug)]
pub struct EventCoalescer {
    debounce: Duration,
    last_seen: HashMap<PathBuf, Instant>,
    pending: PendingChanges,
}

impl EventCoalescer {
    /// Creates a coalescer with the given debounce window.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_seen: HashMap::new(),
            pending: PendingChanges::default(),
        }
    }

    /// Offers an event. Returns `true` when accepted, `false` when
    /// debounced as a repeat for the same path.
    pub fn offer(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get(&path)
            && now.duration_since(*last) < self.debounce
        {
            return false;
        }
        self.last_seen.insert(path.clone(), now);
        match kind {
            ChangeKind::Modified => {
                self.pending.modified.insert(path);
            }
            ChangeKind::Created => {
                self.pending.created.insert(path);
            }
            ChangeKind::Deleted => {
                // A delete supersedes earlier modify/create records.
                self.pending.modified.remove(&path);
                self.pending.created.remove(&path);
                self.pending.deleted.insert(path);
            }
        }
        true
    }

    /// Returns `true` when changes are waiting for a reindex.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes the pending sets, clearing them for the next cycle.
    pub fn take(&mut self) -> PendingChanges {
        std::mem::take(&mut self.pending)
    }
}

/// Watches a source tree and drives the incremental indexer.
pub struct FileWatcher {
    indexer: Arc<Indexer>,
    root: PathBuf,
    debounce: Duration,
    settle: Duration,
}

impl FileWatcher {
    /// Creates a watcher over `root` driving `indexer`.
    #[must_use]
    pub fn new(config: &EngineConfig, indexer: Arc<Indexer>, root: impl Into<PathBuf>) -> Self {
        Self {
            indexer,
            root: root.into(),
            debounce: config.debounce,
            settle: config.settle,
        }
    }

    /// Runs the watch loop until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Watcher`] when the underlying watcher
    /// cannot be created or registered. Event-level errors are logged
    /// and the loop continues.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Event, notify::Error>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| EngineError::Watcher {
            message: e.to_string(),
        })?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Watcher {
                message: e.to_string(),
            })?;
        info!(root = %self.root.display(), "watching source tree");

        let mut coalescer = EventCoalescer::new(self.debounce);
        let mut settle_deadline: Option<Instant> = None;

        loop {
            let sleep = settle_deadline.map_or_else(
                || tokio::time::sleep(Duration::from_secs(3600)),
                |deadline| {
                    tokio::time::sleep(deadline.saturating_duration_since(Instant::now()))
                },
            );
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("watcher shutting down");
                    return Ok(());
                }
                event = rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            let now = Instant::now();
                            if Self::record_event(&mut coalescer, &event, now) {
                                settle_deadline = Some(now + self.settle);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "watch event error, continuing");
                        }
                        None => {
                            warn!("watch channel closed");
                            return Ok(());
                        }
                    }
                }
                () = &mut sleep, if settle_deadline.is_some() => {
                    settle_deadline = None;
                    if coalescer.has_pending() {
                        let changes = coalescer.take();
                        self.reindex(&changes).await;
                    }
                }
            }
        }
    }

    /// Records one notify event into the coalescer. Returns `true` when
    /// any path was accepted.
    fn record_event(coalescer: &mut EventCoalescer, event: &Event, now: Instant) -> bool {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => return false,
        };
        let mut accepted = false;
        for path in &event.paths {
            if !is_source(path) {
                continue;
            }
            if coalescer.offer(path.clone(), kind, now) {
                accepted = true;
            }
        }
        accepted
    }

    /// One reindex cycle: clear the cache marker, rescan, run the
    /// incremental indexer. Runs to completion before the next cycle.
    async fn reindex(&self, changes: &PendingChanges) {
        debug!(
            modified = changes.modified.len(),
            created = changes.created.len(),
            deleted = changes.deleted.len(),
            "settle elapsed, reindexing"
        );
        self.indexer.cache().invalidate();

        let candidates = match Indexer::scan_tree(&self.root) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "rescan failed, skipping cycle");
                return;
            }
        };
        match self.indexer.run_incremental(candidates).await {
            Ok(report) => Self::log_report(&report),
            Err(e) => warn!(error = %e, "incremental reindex failed"),
        }
    }

    fn log_report(report: &IndexReport) {
        info!(
            files = report.files_processed,
            chunks = report.chunks_indexed,
            removed = report.files_removed,
            hash = %report.corpus_hash,
            "reindex complete"
        );
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .field("debounce", &self.debounce)
            .field("settle", &self.settle)
            .finish()
    }
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext == "java")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn test_debounce_drops_repeats_within_window() {
        let mut c = EventCoalescer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(c.offer(p("A.java"), ChangeKind::Modified, t0));
        assert!(!c.offer(p("A.java"), ChangeKind::Modified, t0 + Duration::from_millis(200)));
        assert!(c.offer(p("A.java"), ChangeKind::Modified, t0 + Duration::from_millis(1200)));
    }

    #[test]
    fn test_debounce_is_per_path() {
        let mut c = EventCoalescer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(c.offer(p("A.java"), ChangeKind::Modified, t0));
        assert!(c.offer(p("B.java"), ChangeKind::Modified, t0));
    }

    #[test]
    fn test_pending_sets_partition_by_kind() {
        let mut c = EventCoalescer::new(Duration::from_millis(0));
        let t0 = Instant::now();
        c.offer(p("A.java"), ChangeKind::Modified, t0);
        c.offer(p("B.java"), ChangeKind::Created, t0);
        c.offer(p("C.java"), ChangeKind::Deleted, t0);
        let pending = c.take();
        assert!(pending.modified.contains(&p("A.java")));
        assert!(pending.created.contains(&p("B.java")));
        assert!(pending.deleted.contains(&p("C.java")));
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_delete_supersedes_earlier_records() {
        let mut c = EventCoalescer::new(Duration::from_millis(0));
        let t0 = Instant::now();
        c.offer(p("A.java"), ChangeKind::Modified, t0);
        c.offer(p("A.java"), ChangeKind::Deleted, t0 + Duration::from_millis(1));
        let pending = c.take();
        assert!(pending.modified.is_empty());
        assert!(pending.deleted.contains(&p("A.java")));
    }

    #[test]
    fn test_take_clears_pending() {
        let mut c = EventCoalescer::new(Duration::from_millis(0));
        c.offer(p("A.java"), ChangeKind::Modified, Instant::now());
        assert!(c.has_pending());
        let _ = c.take();
        assert!(!c.has_pending());
    }

    #[test]
    fn test_non_source_paths_ignored() {
        assert!(is_source(Path::new("A.java")));
        assert!(!is_source(Path::new("notes.md")));
        assert!(!is_source(Path::new("Makefile")));
    }
}
