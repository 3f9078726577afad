//! Token accounting, content scoring, and pruning for context assembly.
//!
//! The budget manager is pure bookkeeping: token estimation is
//! `ceil(len/4)`, admission is greedy, and the 80 % near-limit flag lets
//! the planner and retriever tighten their parameters before the budget
//! actually runs out.

use std::collections::HashSet;

/// Usage percentage above which [`ContextBudget::is_near_limit`] trips.
const NEAR_LIMIT_PCT: f64 = 80.0;
/// Content length above which the relevance score takes a flat penalty.
const LONG_CONTENT_CHARS: usize = 5_000;
/// Minimum query-word length considered for matching.
const MIN_MATCH_WORD_LEN: usize = 3;
/// Files scoring below this are dropped from large candidate lists.
const FILE_SCORE_FLOOR: f64 = 0.3;
/// Candidate-list size above which the score floor applies.
const FILE_FLOOR_MIN_LIST: usize = 5;

/// Role keywords scored when present in both query and content/filename.
const ROLE_KEYWORDS: &[&str] = &["service", "config", "advisor"];
/// Structural markers scored in content.
const STRUCTURAL_MARKERS: &[&str] = &["public class", "@Service", "@Component"];

/// Estimates the token count of a string: `ceil(len/4)`.
///
/// Monotone within ±1 under concatenation.
#[must_use]
pub const fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Token-accounting object carried through the retrieval pipeline.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    max_tokens: usize,
    used_tokens: usize,
    over_limit_accepted: bool,
}

impl ContextBudget {
    /// Creates a budget with the given ceiling.
    #[must_use]
    pub const fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            used_tokens: 0,
            over_limit_accepted: false,
        }
    }

    /// Budget ceiling.
    #[must_use]
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tokens admitted so far.
    #[must_use]
    pub const fn used_tokens(&self) -> usize {
        self.used_tokens
    }

    /// Tokens still available.
    #[must_use]
    pub const fn remaining_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.used_tokens)
    }

    /// Returns `true` when `content` fits the remaining budget.
    #[must_use]
    pub const fn can_add(&self, content: &str) -> bool {
        self.used_tokens + estimate_tokens(content) <= self.max_tokens
    }

    /// Admits `content` when it fits. Returns `true` on admission.
    pub fn try_add(&mut self, content: &str) -> bool {
        if self.can_add(content) {
            self.used_tokens += estimate_tokens(content);
            true
        } else {
            false
        }
    }

    /// Admits `content` unconditionally, recording an explicit
    /// over-limit acceptance when it exceeds the ceiling.
    pub fn force_add(&mut self, content: &str) {
        self.used_tokens += estimate_tokens(content);
        if self.used_tokens > self.max_tokens {
            self.over_limit_accepted = true;
        }
    }

    /// Whether an over-limit insertion was explicitly accepted.
    #[must_use]
    pub const fn over_limit_accepted(&self) -> bool {
        self.over_limit_accepted
    }

    /// Usage percentage of the ceiling.
    #[must_use]
    pub fn usage_pct(&self) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.used_tokens as f64 / self.max_tokens as f64 * 100.0;
        pct
    }

    /// Returns `true` above 80 % usage; the planner and retriever use
    /// this to tighten top-k, hop depth, and per-node expansion.
    #[must_use]
    pub fn is_near_limit(&self) -> bool {
        self.usage_pct() > NEAR_LIMIT_PCT
    }
}

fn query_words(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() >= MIN_MATCH_WORD_LEN)
        .map(str::to_string)
        .collect()
}

/// Scores content relevance to a query in `[0, 1]`.
///
/// +0.2 per query-word match, +0.3 per role keyword present in both query
/// and content, +0.2 per structural marker, ×0.8 when the content is
/// longer than 5 000 characters.
#[must_use]
pub fn content_relevance_score(query: &str, content: &str) -> f64 {
    let lower = content.to_lowercase();
    let query_lower = query.to_lowercase();
    let mut score: f64 = 0.0;

    let unique_words: HashSet<String> = query_words(query).into_iter().collect();
    for word in &unique_words {
        if lower.contains(word) {
            score += 0.2;
        }
    }

    for keyword in ROLE_KEYWORDS {
        if query_lower.contains(keyword) && lower.contains(keyword) {
            score += 0.3;
        }
    }

    for marker in STRUCTURAL_MARKERS {
        if content.contains(marker) {
            score += 0.2;
        }
    }

    if content.len() > LONG_CONTENT_CHARS {
        score *= 0.8;
    }

    score.min(1.0)
}

/// Scores a filename's relevance to a query in `[0, 1]`.
///
/// +0.4 per query-word match in the filename, +0.5 per role keyword in
/// both query and filename, +0.3 when the file is in the configured core
/// list.
#[must_use]
pub fn file_relevance_score(query: &str, filename: &str, core_files: &[String]) -> f64 {
    let file_lower = filename.to_lowercase();
    let query_lower = query.to_lowercase();
    let mut score: f64 = 0.0;

    for word in query_words(query) {
        if file_lower.contains(&word) {
            score += 0.4;
        }
    }

    for keyword in ROLE_KEYWORDS {
        if query_lower.contains(keyword) && file_lower.contains(keyword) {
            score += 0.5;
        }
    }

    if core_files.iter().any(|core| core == filename) {
        score += 0.3;
    }

    score.min(1.0)
}

/// Prioritizes candidate files by relevance, score-descending with
/// stable order among ties. Files below the score floor are dropped when
/// the candidate list is larger than five.
#[must_use]
pub fn prioritize_files(query: &str, files: Vec<String>, core_files: &[String]) -> Vec<String> {
    let apply_floor = files.len() > FILE_FLOOR_MIN_LIST;
    let mut scored: Vec<(String, f64)> = files
        .into_iter()
        .map(|f| {
            let score = file_relevance_score(query, &f, core_files);
            (f, score)
        })
        .collect();
    if apply_floor {
        scored.retain(|(_, score)| *score >= FILE_SCORE_FLOOR);
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(f, _)| f).collect()
}

/// Greedily admits the highest-scoring items that fit the budget.
///
/// Items are `(payload, score)`; the returned payloads are in
/// score-descending order and the budget's `used` reflects every
/// admission. Selection stops considering an item when it does not fit,
/// but keeps scanning smaller ones.
pub fn prune_by_score<T>(items: Vec<(T, f64, String)>, budget: &mut ContextBudget) -> Vec<T> {
    let mut sorted = items;
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept = Vec::new();
    for (payload, _, text) in sorted {
        if budget.try_add(&text) {
            kept.push(payload);
        }
    }
    kept
}
