//! Query planning: classify a query and emit a [`SearchPlan`].
//!
//! A pure function of the query string (plus optional recent-intent
//! hints). Rules apply in order; the first match wins. Entity detection
//! uses identifier tokenization (CamelCase / `snake_case` shape), not
//! plain substring matching.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Confidence when a rule's keywords matched cleanly.
const CONFIDENCE_MATCHED: f64 = 0.85;
/// Confidence for the default rule.
const CONFIDENCE_DEFAULT: f64 = 0.5;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"^[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+$").unwrap();
    re
});

static FILE_BASENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"^\w+\.(java|kt|scala)$").unwrap();
    re
});

static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?m)^\s*at\s+[\w.$]+\(").unwrap();
    re
});

/// Retrieval strategy chosen per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain similarity search with defaults.
    SimilaritySearch,
    /// Centered on a named class or file.
    EntityCentered,
    /// Architecture / structure exploration via the dependency graph.
    DependencyGraph,
    /// Implementation questions over method chunks.
    MethodFocused,
    /// Error and stack-trace investigation.
    ErrorTrace,
    /// Configuration and wiring questions.
    ConfigurationChain,
}

impl Strategy {
    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimilaritySearch => "similarity_search",
            Self::EntityCentered => "entity_centered",
            Self::DependencyGraph => "dependency_graph",
            Self::MethodFocused => "method_focused",
            Self::ErrorTrace => "error_trace",
            Self::ConfigurationChain => "configuration_chain",
        }
    }

    /// Keywords appended to the query when searching under this
    /// strategy.
    #[must_use]
    pub const fn augmentation(self) -> &'static str {
        match self {
            Self::SimilaritySearch => "",
            Self::EntityCentered => "class definition responsibility",
            Self::DependencyGraph => "architecture structure dependencies",
            Self::MethodFocused => "method implementation body",
            Self::ErrorTrace => "error exception failure handling",
            Self::ConfigurationChain => "configuration setup wiring",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-request retrieval plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    /// The query as received.
    pub original_query: String,
    /// Chosen strategy.
    pub strategy: Strategy,
    /// Summary-search depth, `1..=64`.
    pub top_k: usize,
    /// Dependency-expansion hop limit, `0..=4`.
    pub max_hops: usize,
    /// Whether reverse dependencies join the expansion.
    pub include_reverse_deps: bool,
    /// Token budget for context assembly.
    pub token_budget: usize,
    /// Target entity identifiers (classes, files).
    pub target_entities: BTreeSet<String>,
    /// Seed files for the expansion frontier.
    pub starting_files: BTreeSet<String>,
    /// Planner confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Pure query classifier.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    /// Known file basenames, used for exact entity matches.
    known_files: BTreeSet<String>,
}

impl QueryPlanner {
    /// Creates a planner with no known-file table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a planner aware of the indexed file basenames.
    #[must_use]
    pub fn with_known_files(known_files: BTreeSet<String>) -> Self {
        Self { known_files }
    }

    /// Builds a [`SearchPlan`] for a query under the given token budget.
    ///
    /// Rules, first match wins:
    /// 1. exact file basename or class-like identifier → entity-centered
    /// 2. error vocabulary or stack shape → error trace
    /// 3. configuration vocabulary → configuration chain
    /// 4. implementation vocabulary → method focused
    /// 5. architecture vocabulary → dependency graph
    /// 6. default → similarity search
    #[must_use]
    pub fn plan(&self, query: &str, token_budget: usize) -> SearchPlan {
        let lower = query.to_lowercase();
        let entities = self.extract_entities(query);

        let (strategy, top_k, max_hops, reverse, confidence) = if !entities.is_empty() {
            (Strategy::EntityCentered, 4, 1, true, CONFIDENCE_MATCHED)
        } else if Self::has_error_shape(query, &lower) {
            (Strategy::ErrorTrace, 6, 2, true, CONFIDENCE_MATCHED)
        } else if contains_any(&lower, &["config", "bean", "setup"]) {
            (Strategy::ConfigurationChain, 4, 1, false, CONFIDENCE_MATCHED)
        } else if contains_any(&lower, &["how does", "implement", "method"]) {
            (Strategy::MethodFocused, 6, 1, false, CONFIDENCE_MATCHED)
        } else if contains_any(&lower, &["architecture", "design", "structure"]) {
            (Strategy::DependencyGraph, 6, 2, true, CONFIDENCE_MATCHED)
        } else {
            (Strategy::SimilaritySearch, 5, 1, false, CONFIDENCE_DEFAULT)
        };

        SearchPlan {
            original_query: query.to_string(),
            strategy,
            top_k,
            max_hops,
            include_reverse_deps: reverse,
            token_budget,
            target_entities: entities,
            starting_files: BTreeSet::new(),
            confidence,
        }
    }

    /// Extracts entity identifiers: exact known-file basenames, file-like
    /// tokens, and CamelCase class identifiers.
    fn extract_entities(&self, query: &str) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();
        for raw in query.split_whitespace() {
            let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '_');
            if token.is_empty() {
                continue;
            }
            if FILE_BASENAME_RE.is_match(token) || self.known_files.contains(token) {
                entities.insert(token.to_string());
            } else if IDENTIFIER_RE.is_match(token) {
                entities.insert(token.to_string());
            }
        }
        entities
    }

    fn has_error_shape(query: &str, lower: &str) -> bool {
        contains_any(lower, &["error", "exception", "fail"]) || STACK_FRAME_RE.is_match(query)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
