//! Brain registry: startup enumeration and semantic specialist selection.
//!
//! The registry is populated explicitly by the binary at startup. Each
//! specialist's description is indexed in a vector index; per request,
//! the scheduler asks for the top-N specialists nearest the query, plus
//! any the conductor explicitly included. Execution order is ascending
//! stage `order`, ties broken by registration order.

use std::sync::Arc;

use tracing::warn;

use crate::chain::stage::{Stage, StageRole};
use crate::vector::{Document, InMemoryVectorIndex, VectorIndex};

/// Registry of selectable specialist stages.
#[derive(Default)]
pub struct BrainRegistry {
    specialists: Vec<Arc<dyn Stage>>,
    index: InMemoryVectorIndex,
}

impl BrainRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a specialist and indexes its description.
    ///
    /// Core stages are rejected with a warning; they are wired into the
    /// scheduler directly and never selected by similarity.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        if stage.role() != StageRole::Specialist {
            warn!(stage = stage.name(), "core stages are not registered for selection");
            return;
        }
        let doc = Document::new(
            format!("{} {}", stage.name(), stage.description()),
            [("stage_name", stage.name())],
        );
        if let Err(e) = self.index.add(vec![doc]) {
            warn!(stage = stage.name(), error = %e, "failed to index stage description");
        }
        self.specialists.push(stage);
    }

    /// Selects specialists for a query: the top-N nearest descriptions
    /// plus any explicitly included names, in ascending `order` with
    /// registration-order tie-breaks.
    #[must_use]
    pub fn select(&self, query: &str, top_n: usize, included: &[String]) -> Vec<Arc<dyn Stage>> {
        let mut names: Vec<String> = self
            .index
            .similarity_search(query, top_n)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| hit.document.meta("stage_name").map(str::to_string))
            .collect();
        for name in included {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        let mut selected: Vec<(usize, Arc<dyn Stage>)> = self
            .specialists
            .iter()
            .enumerate()
            .filter(|(_, stage)| names.iter().any(|n| n == stage.name()))
            .map(|(idx, stage)| (idx, Arc::clone(stage)))
            .collect();
        selected.sort_by_key(|(idx, stage)| (stage.order(), *idx));
        selected.into_iter().map(|(_, stage)| stage).collect()
    }

    /// Names of every registered specialist, registration-ordered.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.specialists.iter().map(|s| s.name()).collect()
    }

    /// Number of registered specialists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

impl std::fmt::Debug for BrainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrainRegistry")
            .field("specialists", &self.names())
            .finish()
    }
}
