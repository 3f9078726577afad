//! Context-retrieval subsystem.
//!
//! Query planner → token budget → dependency-graph expansion → two-tier
//! (summary + chunk) retrieval. The retriever owns nothing persistent; it
//! reads the vector index and the dependency graph built by the indexing
//! pipeline.

pub mod budget;
pub mod deps;
pub mod planner;
pub mod retriever;

pub use budget::{ContextBudget, content_relevance_score, estimate_tokens, file_relevance_score};
pub use deps::DependencyGraph;
pub use planner::{QueryPlanner, SearchPlan, Strategy};
pub use retriever::{CodeContext, CodeRetriever};
