//! cortex-rs: a cognitive request-routing engine.
//!
//! Receives a natural-language query, assembles a per-request chain of
//! processing stages ("brains"), executes them sequentially over a
//! shared scratchpad, and synthesizes a reply under token, latency, and
//! quality budgets. A lexical vector index over stage descriptions
//! selects specialists per query; a two-tier (summary + chunk) retriever
//! with dependency-graph expansion supplies code context; an
//! incremental, hash-addressed indexing pipeline keeps the retrieval
//! stores in sync with a source tree.
//!
//! # Architecture
//!
//! ```text
//! request → ChainScheduler
//!   ├── Conductor       (SearchPlan + tool approval)
//!   ├── ContextFetcher  (CodeRetriever → CodeContext)
//!   ├── ToolGate        (allow-list + argument validation)
//!   ├── Specialists     (top-N by description similarity)
//!   ├── Judge           (consistency + hallucination gates)
//!   └── Voice           (final text)
//!
//! source tree → Indexer ─┬→ vector index (summaries + chunks)
//!   FileWatcher ─────────┼→ similarity graph
//!                        └→ embedding cache (hash-addressed)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use cortex_rs::chain::ChainRequest;
//! use cortex_rs::config::EngineConfig;
//! use cortex_rs::engine::Engine;
//!
//! # async fn run() -> Result<(), cortex_rs::error::EngineError> {
//! let engine = Engine::new(EngineConfig::from_env())?;
//! engine.index_tree(std::path::Path::new("./src/main/java")).await?;
//! let reply = engine
//!     .ask(ChainRequest::new("default", "explain CacheManager"))
//!     .await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod memory;
pub mod quality;
pub mod quota;
pub mod retrieval;
pub mod timeline;
pub mod vector;

pub use chain::{ChainRequest, ChainResponse};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStatus};
pub use error::EngineError;
