//! Brain-chain core: scratchpad, stages, registry, supervisor, tool
//! gate, and the per-request scheduler.
//!
//! ```text
//! request → scheduler
//!   ├── Conductor        (plan + tool approval)
//!   ├── ContextFetcher   (retrieval → scratchpad)
//!   ├── ToolGate         (allow-list + argument validation)
//!   ├── Specialists      (selected by description similarity)
//!   ├── Judge            (quality gates → verdict)
//!   └── Voice            (final text)
//! ```
//!
//! The scheduler runs at most two ReAct passes, merges through the
//! supervisor, and degrades instead of unwinding on stage failure.

pub mod registry;
pub mod scheduler;
pub mod scratchpad;
pub mod stage;
pub mod stages;
pub mod supervisor;
pub mod tool_gate;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::memory::{ConversationMemoryService, WorkingMemoryService};
use crate::quality::{ConsistencyChecker, HallucinationDetector};
use crate::quota::TokenQuotaService;
use crate::retrieval::{CodeRetriever, QueryPlanner};
use crate::timeline::Profiler;

pub use registry::BrainRegistry;
pub use scheduler::{ChainRequest, ChainResponse, ChainScheduler};
pub use scratchpad::{
    ConductorPlan, JudgeVerdict, MergedOutput, ScratchPad, StageOutput, ToolOutcome,
};
pub use stage::{Stage, StageRole};
pub use supervisor::{ConsistencyOutcome, DivergentPair, Supervisor};
pub use tool_gate::{
    NullToolRunner, ToolCatalog, ToolDescriptor, ToolFamily, ToolGateStage, ToolInvocation,
    ToolRunner, validate_invocation,
};

/// Long-lived services shared by every stage.
///
/// Owned by the process root and handed to stages by reference; the
/// scratchpad carries all request-scoped state.
pub struct EngineServices {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Query planner.
    pub planner: QueryPlanner,
    /// Code retriever.
    pub retriever: Arc<CodeRetriever>,
    /// Tool description catalog.
    pub tool_catalog: Arc<ToolCatalog>,
    /// External tool executor.
    pub tool_runner: Arc<dyn ToolRunner>,
    /// Per-user working memory.
    pub working_memory: Arc<WorkingMemoryService>,
    /// Per-session conversation memory.
    pub conversation_memory: Arc<ConversationMemoryService>,
    /// Output supervisor.
    pub supervisor: Arc<Supervisor>,
    /// Consistency gate.
    pub consistency: ConsistencyChecker,
    /// Hallucination gate.
    pub hallucination: HallucinationDetector,
    /// Per-user token quotas.
    pub quotas: Arc<TokenQuotaService>,
    /// Recent-request profiler.
    pub profiler: Arc<Profiler>,
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices")
            .field("provider", &self.config.provider)
            .field("tools", &self.tool_catalog.len())
            .finish()
    }
}

#[cfg(test)]
impl EngineServices {
    /// Services over empty stores, backed by the echo provider.
    pub(crate) fn for_tests() -> Self {
        use crate::retrieval::DependencyGraph;
        use crate::vector::InMemoryVectorIndex;
        use std::sync::RwLock;

        let config = EngineConfig::builder().build();
        let index = Arc::new(InMemoryVectorIndex::new());
        let deps = Arc::new(RwLock::new(DependencyGraph::default()));
        let retriever = Arc::new(CodeRetriever::new(
            index,
            deps,
            QueryPlanner::new(),
            Vec::new(),
        ));
        Self {
            planner: QueryPlanner::new(),
            retriever,
            tool_catalog: Arc::new(ToolCatalog::default_catalog()),
            tool_runner: Arc::new(NullToolRunner::new()),
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
            config,
        }
    }
}
