//! Request-scoped shared state.
//!
//! One [`ScratchPad`] exists per request. Stages run one at a time on a
//! single logical worker, so slots need no locking; read-after-write
//! within an iteration is sequentially consistent. The pad is created by
//! the scheduler on entry and dropped in its guaranteed cleanup.

use std::collections::BTreeMap;

use crate::quality::{ConsistencyReport, HallucinationReport};
use crate::retrieval::{CodeContext, SearchPlan};

/// The conductor's master plan beyond retrieval parameters.
#[derive(Debug, Clone, Default)]
pub struct ConductorPlan {
    /// Estimated request complexity, `1..=5`.
    pub complexity: u8,
    /// Tools the plan declares as required.
    pub required_tools: Vec<String>,
    /// Specialist stages the conductor explicitly included.
    pub included_specialists: Vec<String>,
}

/// Output of a single stage execution.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Producing stage.
    pub stage_name: String,
    /// Output text.
    pub text: String,
    /// Self-assessed quality in `[0, 1]`.
    pub quality: f64,
    /// Prompt-side tokens consumed.
    pub tokens_in: u32,
    /// Completion-side tokens produced.
    pub tokens_out: u32,
    /// Wall-clock duration in millis.
    pub elapsed_ms: u64,
}

impl StageOutput {
    /// Creates an output with zero token counts and timing; the
    /// scheduler stamps `elapsed_ms`.
    #[must_use]
    pub fn new(stage_name: &str, text: impl Into<String>, quality: f64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            text: text.into(),
            quality: quality.clamp(0.0, 1.0),
            tokens_in: 0,
            tokens_out: 0,
            elapsed_ms: 0,
        }
    }

    /// Empty output for a failed stage; the supervisor sees quality 0.
    #[must_use]
    pub fn empty(stage_name: &str) -> Self {
        Self::new(stage_name, "", 0.0)
    }
}

/// Merged response candidate produced by the supervisor.
#[derive(Debug, Clone, Default)]
pub struct MergedOutput {
    /// Concatenated top-quality stage texts.
    pub text: String,
    /// Average quality of the merged contributors.
    pub average_quality: f64,
}

/// The Judge's verdict for one iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgeVerdict {
    /// Computed quality in `[0, 1]`.
    pub quality: f64,
    /// Whether the Judge asks for another pass.
    pub wants_refine: bool,
}

/// One executed tool invocation and its result.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Tool name.
    pub name: String,
    /// Validated arguments as invoked.
    pub args: BTreeMap<String, String>,
    /// Tool output text.
    pub output: String,
}

/// Per-request keyed bag of typed slots shared across stages.
#[derive(Debug, Default)]
pub struct ScratchPad {
    /// Request trace id.
    pub trace_id: String,
    /// Resolved provider name.
    pub provider: String,
    /// Conversation id (stable across turns).
    pub conversation_id: String,
    /// User id for memory and quota accounting.
    pub user_id: String,
    /// Current ReAct iteration, 0-based.
    pub iteration: usize,
    /// The user query.
    pub user_query: String,
    /// Retrieval plan from the conductor.
    pub search_plan: Option<SearchPlan>,
    /// Conductor master plan.
    pub conductor_plan: Option<ConductorPlan>,
    /// Tools suggested by discovery.
    pub suggested_tools: Vec<String>,
    /// Tools the conductor approved (⊆ suggested).
    pub approved_tools: Vec<String>,
    /// Assembled retrieval context.
    pub code_context: Option<CodeContext>,
    /// Stage outputs of the current iteration, execution-ordered.
    pub stage_outputs: Vec<StageOutput>,
    /// Latest merged candidate.
    pub merged_output: Option<MergedOutput>,
    /// Latest consistency report.
    pub consistency: Option<ConsistencyReport>,
    /// Latest hallucination report.
    pub hallucination: Option<HallucinationReport>,
    /// Latest Judge verdict.
    pub judge_verdict: Option<JudgeVerdict>,
    /// Executed tool outcomes.
    pub tool_outcomes: Vec<ToolOutcome>,
}

impl ScratchPad {
    /// Creates a pad for a request.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        provider: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        user_query: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            provider: provider.into(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            user_query: user_query.into(),
            ..Self::default()
        }
    }

    /// Names of tools that actually ran, deduplicated across iterations.
    #[must_use]
    pub fn tools_used(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        self.tool_outcomes
            .iter()
            .filter(|t| seen.insert(t.name.as_str()))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Clears per-iteration slots while keeping request identity and
    /// conductor decisions.
    pub fn begin_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
        self.stage_outputs.clear();
        self.merged_output = None;
        self.consistency = None;
        self.hallucination = None;
        self.judge_verdict = None;
    }
}
