//! Code retrieval: executes a [`SearchPlan`] into a [`CodeContext`].
//!
//! Two-tier retrieval. Summaries are selected first (per-entity lookups
//! for entity-centered plans, augmented similarity search otherwise),
//! the frontier expands through the dependency graph BFS-level by level,
//! and chunks are then retrieved, filtered to the expanded file set, and
//! pruned under the token budget. Ordering guarantees: summaries before
//! chunks; expansion is BFS-level-ordered; ties within a level use
//! score-descending stable order.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::retrieval::budget::{
    ContextBudget, content_relevance_score, file_relevance_score, prioritize_files,
};
use crate::retrieval::deps::DependencyGraph;
use crate::retrieval::planner::{QueryPlanner, SearchPlan, Strategy};
use crate::vector::{CHUNK_TYPE_SUMMARY, Document, META_CHUNK_TYPE, SearchHit, VectorIndex};

/// Forward dependencies admitted per file per level.
const FORWARD_DEPS_PER_NODE: usize = 4;
/// Forward dependencies admitted per file per level when near the limit.
const FORWARD_DEPS_NEAR_LIMIT: usize = 2;
/// Reverse dependencies admitted per file per level.
const REVERSE_DEPS_PER_NODE: usize = 2;
/// Reverse dependencies admitted per file per level when near the limit.
const REVERSE_DEPS_NEAR_LIMIT: usize = 1;
/// Per-entity summary lookups use this top-k.
const ENTITY_TOP_K: usize = 2;
/// Chunk search top-k reduction when near the limit.
const NEAR_LIMIT_TOP_K_CUT: usize = 2;
/// Chunk search top-k floor.
const TOP_K_FLOOR: usize = 3;

/// Assembled retrieval context for one query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CodeContext {
    /// File summaries, selection-ordered.
    pub file_summaries: Vec<Document>,
    /// Code chunks, score-ordered after pruning.
    pub code_chunks: Vec<Document>,
    /// Files represented in the context.
    pub relevant_files: BTreeSet<String>,
    /// The original query.
    pub query: String,
    /// Tokens admitted against the budget.
    pub tokens_used: usize,
    /// Strategy that produced this context.
    pub strategy: String,
    /// Planner confidence.
    pub confidence: f64,
}

/// Executes search plans against the vector index and dependency graph.
pub struct CodeRetriever {
    index: Arc<dyn VectorIndex>,
    deps: Arc<RwLock<DependencyGraph>>,
    planner: QueryPlanner,
    core_files: Vec<String>,
}

impl CodeRetriever {
    /// Creates a retriever over the given index and dependency graph.
    #[must_use]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        deps: Arc<RwLock<DependencyGraph>>,
        planner: QueryPlanner,
        core_files: Vec<String>,
    ) -> Self {
        Self {
            index,
            deps,
            planner,
            core_files,
        }
    }

    /// Plans and retrieves in one step.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Index`] when the vector index fails.
    pub fn retrieve(&self, query: &str, token_budget: usize) -> Result<CodeContext, EngineError> {
        let plan = self.planner.plan(query, token_budget);
        self.retrieve_with_plan(&plan)
    }

    /// Executes an existing plan.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Index`] when the vector index fails.
    pub fn retrieve_with_plan(&self, plan: &SearchPlan) -> Result<CodeContext, EngineError> {
        if plan.original_query.trim().is_empty() {
            return Ok(CodeContext {
                strategy: plan.strategy.to_string(),
                confidence: plan.confidence,
                ..CodeContext::default()
            });
        }

        let mut budget = ContextBudget::new(plan.token_budget);

        // Tier 1: summaries.
        let summary_hits = self.select_summaries(plan)?;
        let mut summaries: Vec<Document> = Vec::new();
        let mut seed_files: Vec<String> = plan.starting_files.iter().cloned().collect();
        for hit in summary_hits {
            if !budget.try_add(&hit.document.text) {
                continue;
            }
            if let Some(name) = hit.document.filename() {
                seed_files.push(name.to_string());
            }
            summaries.push(hit.document);
        }

        // Frontier expansion through the dependency graph.
        let expanded = self.expand_files(plan, seed_files, &budget);

        // Tier 2: chunks, filtered to the expanded set, pruned under
        // the budget.
        let chunks = self.select_chunks(plan, &expanded, &mut budget)?;

        let mut relevant_files: BTreeSet<String> = expanded.into_iter().collect();
        for doc in summaries.iter().chain(&chunks) {
            if let Some(name) = doc.filename() {
                relevant_files.insert(name.to_string());
            }
        }

        debug!(
            strategy = %plan.strategy,
            summaries = summaries.len(),
            chunks = chunks.len(),
            tokens = budget.used_tokens(),
            "context assembled"
        );

        Ok(CodeContext {
            file_summaries: summaries,
            code_chunks: chunks,
            relevant_files,
            query: plan.original_query.clone(),
            tokens_used: budget.used_tokens(),
            strategy: plan.strategy.to_string(),
            confidence: plan.confidence,
        })
    }

    /// Selects summary documents per the plan's strategy.
    ///
    /// Entity-centered plans query the summary tier per target entity
    /// first and fall back to plain similarity only when every entity
    /// query came back empty.
    fn select_summaries(&self, plan: &SearchPlan) -> Result<Vec<SearchHit>, EngineError> {
        if plan.strategy == Strategy::EntityCentered && !plan.target_entities.is_empty() {
            let mut hits: Vec<SearchHit> = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for entity in &plan.target_entities {
                for hit in self.search_tier(entity, ENTITY_TOP_K, true)? {
                    let key = hit
                        .document
                        .filename()
                        .map_or_else(|| hit.document.text.clone(), str::to_string);
                    if seen.insert(key) {
                        hits.push(hit);
                    }
                }
            }
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        let augmented = augment_query(plan);
        self.search_tier(&augmented, plan.top_k, true)
    }

    /// Selects chunk documents: enhanced query, near-limit-reduced top-k,
    /// filename filter, then budget pruning.
    fn select_chunks(
        &self,
        plan: &SearchPlan,
        expanded: &[String],
        budget: &mut ContextBudget,
    ) -> Result<Vec<Document>, EngineError> {
        let mut top_k = plan.top_k;
        if budget.is_near_limit() {
            top_k = top_k.saturating_sub(NEAR_LIMIT_TOP_K_CUT).max(TOP_K_FLOOR);
        }

        let mut enhanced = augment_query(plan);
        for entity in &plan.target_entities {
            enhanced.push(' ');
            enhanced.push_str(entity);
        }

        let allowed: BTreeSet<&str> = expanded.iter().map(String::as_str).collect();
        let hits = self.search_tier(&enhanced, top_k, false)?;

        let scored: Vec<(Document, f64, String)> = hits
            .into_iter()
            .filter(|hit| {
                hit.document
                    .filename()
                    .is_some_and(|name| allowed.contains(name))
            })
            .map(|hit| {
                let relevance =
                    content_relevance_score(&plan.original_query, &hit.document.text);
                let combined = hit.score.mul_add(0.5, relevance * 0.5);
                let text = hit.document.text.clone();
                (hit.document, combined, text)
            })
            .collect();

        Ok(crate::retrieval::budget::prune_by_score(scored, budget))
    }

    /// BFS expansion over the dependency graph.
    ///
    /// Seeds are prioritized through the budget manager; each level
    /// admits the highest-scoring forward (and optionally reverse)
    /// dependencies per file, with tighter caps when the budget is near
    /// its limit. Returns BFS-level-ordered files, seeds first.
    fn expand_files(&self, plan: &SearchPlan, seeds: Vec<String>, budget: &ContextBudget) -> Vec<String> {
        let near_limit = budget.is_near_limit();
        let forward_cap = if near_limit {
            FORWARD_DEPS_NEAR_LIMIT
        } else {
            FORWARD_DEPS_PER_NODE
        };
        let reverse_cap = if near_limit {
            REVERSE_DEPS_NEAR_LIMIT
        } else {
            REVERSE_DEPS_PER_NODE
        };

        let prioritized = prioritize_files(&plan.original_query, seeds, &self.core_files);

        let mut visited: BTreeSet<String> = prioritized.iter().cloned().collect();
        let mut ordered: Vec<String> = prioritized.clone();
        let mut frontier = prioritized;

        let Ok(graph) = self.deps.read() else {
            return ordered;
        };

        for _hop in 0..plan.max_hops {
            if frontier.is_empty() || budget.remaining_tokens() == 0 {
                break;
            }
            let mut next_level: Vec<String> = Vec::new();
            for file in &frontier {
                let mut forward: Vec<&String> = graph.forward(file).iter().collect();
                sort_by_file_score(&mut forward, &plan.original_query, &self.core_files);
                for dep in forward.into_iter().take(forward_cap) {
                    if visited.insert(dep.clone()) {
                        next_level.push(dep.clone());
                    }
                }

                if plan.include_reverse_deps {
                    let mut reverse: Vec<&String> = graph.reverse(file).iter().collect();
                    sort_by_file_score(&mut reverse, &plan.original_query, &self.core_files);
                    for dep in reverse.into_iter().take(reverse_cap) {
                        if visited.insert(dep.clone()) {
                            next_level.push(dep.clone());
                        }
                    }
                }
            }
            ordered.extend(next_level.iter().cloned());
            frontier = next_level;
        }

        ordered
    }

    /// Searches one tier of the index, filtering hits by chunk type.
    fn search_tier(
        &self,
        query: &str,
        top_k: usize,
        summaries: bool,
    ) -> Result<Vec<SearchHit>, EngineError> {
        // Oversample before filtering, since both tiers share the index.
        let hits = self.index.similarity_search(query, top_k.saturating_mul(4))?;
        Ok(hits
            .into_iter()
            .filter(|hit| {
                let is_summary = hit.document.meta(META_CHUNK_TYPE) == Some(CHUNK_TYPE_SUMMARY);
                is_summary == summaries
            })
            .take(top_k)
            .collect())
    }
}

impl std::fmt::Debug for CodeRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRetriever")
            .field("core_files", &self.core_files)
            .finish()
    }
}

fn augment_query(plan: &SearchPlan) -> String {
    let keywords = plan.strategy.augmentation();
    if keywords.is_empty() {
        plan.original_query.clone()
    } else {
        format!("{} {keywords}", plan.original_query)
    }
}

fn sort_by_file_score(files: &mut [&String], query: &str, core_files: &[String]) {
    files.sort_by(|a, b| {
        let sa = file_relevance_score(query, a, core_files);
        let sb = file_relevance_score(query, b, core_files);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{CHUNK_TYPE_METHOD, InMemoryVectorIndex, META_FILENAME};

    fn summary(filename: &str, text: &str) -> Document {
        Document::new(
            text,
            [
                (META_FILENAME, filename),
                (META_CHUNK_TYPE, CHUNK_TYPE_SUMMARY),
            ],
        )
    }

    fn chunk(filename: &str, text: &str) -> Document {
        Document::new(
            text,
            [
                (META_FILENAME, filename),
                (META_CHUNK_TYPE, CHUNK_TYPE_METHOD),
            ],
        )
    }

    fn graph() -> DependencyGraph {
        let files = vec![
            (
                "CacheManager.java".to_string(),
                r"package com.example;
import com.example.Store;
public class CacheManager {
    public void evictStale(String key) { purgeExpired(key.trim().toLowerCase()); }
}
"
                .to_string(),
            ),
            (
                "Store.java".to_string(),
                r"package com.example;
public class Store {
    public void purgeExpired(String key) { System.out.println(key + key.length()); }
}
"
                .to_string(),
            ),
        ];
        DependencyGraph::build(&files, "com.example")
    }

    fn retriever(index: Arc<InMemoryVectorIndex>) -> CodeRetriever {
        CodeRetriever::new(
            index,
            Arc::new(RwLock::new(graph())),
            QueryPlanner::new(),
            Vec::new(),
        )
    }

    fn seeded_index() -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .add(vec![
                summary("CacheManager.java", "CacheManager evicts stale cache entries"),
                summary("Store.java", "Store persists entries on disk"),
                chunk(
                    "CacheManager.java",
                    "public void evictStale(String key) { purgeExpired(key); } cache entries",
                ),
                chunk("Store.java", "public void purgeExpired(String key) { } cache entries"),
                chunk("Unrelated.java", "something about cache entries elsewhere"),
            ])
            .unwrap_or_else(|e| unreachable!("add: {e}"));
        index
    }

    #[test]
    fn test_empty_query_returns_empty_context() {
        let ctx = retriever(seeded_index())
            .retrieve("", 1000)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert!(ctx.file_summaries.is_empty());
        assert!(ctx.code_chunks.is_empty());
        assert_eq!(ctx.tokens_used, 0);
    }

    #[test]
    fn test_entity_query_returns_entity_summaries_first() {
        let ctx = retriever(seeded_index())
            .retrieve("explain CacheManager", 4000)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert_eq!(ctx.strategy, "entity_centered");
        assert_eq!(
            ctx.file_summaries
                .first()
                .and_then(Document::filename),
            Some("CacheManager.java")
        );
        assert!(ctx.relevant_files.contains("CacheManager.java"));
        // Expanded through the dependency graph.
        assert!(ctx.relevant_files.contains("Store.java"));
    }

    #[test]
    fn test_chunks_filtered_to_expanded_set() {
        let ctx = retriever(seeded_index())
            .retrieve("explain CacheManager cache entries", 4000)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert!(
            ctx.code_chunks
                .iter()
                .all(|c| c.filename() != Some("Unrelated.java"))
        );
    }

    #[test]
    fn test_budget_exhaustion_bounds_tokens_used() {
        let budget = 30;
        let ctx = retriever(seeded_index())
            .retrieve("cache entries", budget)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert!(ctx.tokens_used <= budget);
    }

    #[test]
    fn test_summaries_come_before_chunks_in_token_accounting() {
        // With a budget that only fits summaries, no chunks survive.
        let ctx = retriever(seeded_index())
            .retrieve("cache entries", 14)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert!(ctx.code_chunks.is_empty());
        assert!(!ctx.file_summaries.is_empty());
    }

    #[test]
    fn test_zero_hops_returns_seed_files_only() {
        let index = seeded_index();
        let retriever = retriever(index);
        let mut plan = QueryPlanner::new().plan("explain CacheManager", 4000);
        plan.max_hops = 0;
        let ctx = retriever
            .retrieve_with_plan(&plan)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert!(!ctx.relevant_files.contains("Store.java"));
    }

    #[test]
    fn test_strategy_recorded_in_context() {
        let ctx = retriever(seeded_index())
            .retrieve("how does eviction work", 4000)
            .unwrap_or_else(|e| unreachable!("retrieve: {e}"));
        assert_eq!(ctx.strategy, "method_focused");
    }
}
