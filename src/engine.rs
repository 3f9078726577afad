//! Process root: owns every long-lived service and wires the chain.
//!
//! The `Engine` replaces container-style auto-registration with explicit
//! construction: the binary builds one `Engine` from an [`EngineConfig`],
//! the engine builds the index, retriever, registry, and scheduler, and
//! everything else flows through it.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::info;

use crate::chain::stages::default_specialists;
use crate::chain::{
    BrainRegistry, ChainRequest, ChainResponse, ChainScheduler, EngineServices, NullToolRunner,
    Supervisor, ToolCatalog, ToolRunner,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::{FileWatcher, IndexReport, Indexer};
use crate::llm::{ProviderName, create_provider};
use crate::memory::{ConversationMemoryService, WorkingMemoryService};
use crate::quality::{ConsistencyChecker, HallucinationDetector};
use crate::quota::TokenQuotaService;
use crate::retrieval::{CodeRetriever, DependencyGraph, QueryPlanner, SearchPlan};
use crate::timeline::Profiler;
use crate::vector::{InMemoryVectorIndex, VectorIndex};

/// Aggregate engine state for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Documents in the vector index.
    pub indexed_documents: usize,
    /// Similarity-graph node count.
    pub similarity_nodes: usize,
    /// Similarity-graph edge count.
    pub similarity_edges: usize,
    /// Files in the dependency graph.
    pub dependency_files: usize,
    /// Forward edges in the dependency graph.
    pub dependency_edges: usize,
    /// Live conversation sessions.
    pub sessions: usize,
    /// Long-term memories retained.
    pub long_term_memories: usize,
    /// Request timelines retained by the profiler.
    pub recent_requests: usize,
}

/// The assembled engine.
pub struct Engine {
    config: EngineConfig,
    index: Arc<InMemoryVectorIndex>,
    deps: Arc<RwLock<DependencyGraph>>,
    indexer: Arc<Indexer>,
    services: Arc<EngineServices>,
    scheduler: ChainScheduler,
}

impl Engine {
    /// Builds an engine with the default tool runner.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_tool_runner(config, Arc::new(NullToolRunner::new()))
    }

    /// Builds an engine with an external tool runner.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on invalid configuration.
    pub fn with_tool_runner(
        config: EngineConfig,
        tool_runner: Arc<dyn ToolRunner>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let provider_name =
            ProviderName::resolve(&config.provider).unwrap_or(ProviderName::Default);
        let provider = create_provider(provider_name, &config);

        let index = Arc::new(InMemoryVectorIndex::new());
        let deps = Arc::new(RwLock::new(DependencyGraph::default()));
        let indexer = Arc::new(Indexer::new(
            &config,
            Arc::clone(&index) as Arc<dyn VectorIndex>,
            Arc::clone(&provider),
        ));

        let planner = QueryPlanner::new();
        let retriever = Arc::new(CodeRetriever::new(
            Arc::clone(&index) as Arc<dyn VectorIndex>,
            Arc::clone(&deps),
            planner.clone(),
            Vec::new(),
        ));

        let services = Arc::new(EngineServices {
            planner,
            retriever,
            tool_catalog: Arc::new(ToolCatalog::default_catalog()),
            tool_runner,
            working_memory: Arc::new(WorkingMemoryService::new()),
            conversation_memory: Arc::new(ConversationMemoryService::new()),
            supervisor: Arc::new(Supervisor::new(config.max_reevaluations)),
            consistency: ConsistencyChecker::new(),
            hallucination: HallucinationDetector::new(),
            quotas: Arc::new(TokenQuotaService::new(
                config.monthly_quota,
                config.quota_warn_pct,
            )),
            profiler: Arc::new(Profiler::new()),
            config: config.clone(),
        });

        let mut registry = BrainRegistry::new();
        for stage in default_specialists() {
            registry.register(stage);
        }
        info!(specialists = registry.len(), "brain registry populated");

        let scheduler = ChainScheduler::new(Arc::clone(&services), Arc::new(registry));

        Ok(Self {
            config,
            index,
            deps,
            indexer,
            services,
            scheduler,
        })
    }

    /// Indexes a source tree (cold or cache-hit) and rebuilds the
    /// dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on unreadable files or index failure.
    pub async fn index_tree(&self, root: &Path) -> Result<IndexReport, EngineError> {
        let report = self.indexer.run_startup(root).await?;
        self.rebuild_dependency_graph(root)?;
        Ok(report)
    }

    /// Rebuilds the dependency graph from the current tree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when the tree cannot be read.
    pub fn rebuild_dependency_graph(&self, root: &Path) -> Result<(), EngineError> {
        let paths = Indexer::scan_tree(root)?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| EngineError::io(path.display().to_string(), e))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            files.push((name, content));
        }
        let graph = DependencyGraph::build(&files, &self.config.project_namespace);
        let mut guard = self.deps.write().map_err(|_| EngineError::Index {
            message: "dependency graph lock poisoned".to_string(),
        })?;
        *guard = graph;
        Ok(())
    }

    /// Routes one request through the brain chain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidProvider`] for an empty provider
    /// string and [`EngineError::ChainExhausted`] when no stage produced
    /// output; everything else degrades into a partial response.
    pub async fn ask(&self, request: ChainRequest) -> Result<ChainResponse, EngineError> {
        self.scheduler.handle(request).await
    }

    /// Builds the search plan the planner would emit for a query.
    #[must_use]
    pub fn plan(&self, query: &str) -> SearchPlan {
        self.services
            .planner
            .plan(query, self.config.planner_token_budget())
    }

    /// Creates a file watcher over a source tree driving this engine's
    /// indexer.
    #[must_use]
    pub fn watcher(&self, root: impl Into<std::path::PathBuf>) -> FileWatcher {
        FileWatcher::new(&self.config, Arc::clone(&self.indexer), root)
    }

    /// Current aggregate state.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let (similarity_nodes, similarity_edges) = self.indexer.graph_stats();
        let (dependency_files, dependency_edges) = self
            .deps
            .read()
            .map(|g| (g.len(), g.edge_count()))
            .unwrap_or((0, 0));
        EngineStatus {
            indexed_documents: self.index.len(),
            similarity_nodes,
            similarity_edges,
            dependency_files,
            dependency_edges,
            sessions: self.services.conversation_memory.session_count(),
            long_term_memories: self.services.conversation_memory.long_term_count(),
            recent_requests: self.services.profiler.len(),
        }
    }

    /// Sweeps idle conversation sessions.
    pub fn sweep_sessions(&self) -> usize {
        self.services.conversation_memory.sweep_idle()
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared services (memories, quotas, profiler).
    #[must_use]
    pub const fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.config.provider)
            .field("indexed_documents", &self.index.len())
            .finish()
    }
}
