//! Per-request brain-chain scheduler.
//!
//! Owns the scratchpad and timeline for one request. Runs the core
//! prefix (Conductor, ContextFetcher, ToolGate), the selected
//! specialists in ascending order, then the core suffix (Judge, Voice),
//! iterating at most `scheduler.maxIterations` times. Stage failures
//! demote to empty outputs; deadline expiry merges what exists and
//! returns a partial response labelled `timeout`. Cleanup (timeline,
//! quota accounting, conversation memory) runs on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::EngineServices;
use crate::chain::registry::BrainRegistry;
use crate::chain::scratchpad::{ScratchPad, StageOutput};
use crate::chain::stage::Stage;
use crate::chain::stages::{ConductorStage, ContextFetcherStage, JudgeStage, VoiceStage};
use crate::chain::tool_gate::ToolGateStage;
use crate::error::EngineError;
use crate::llm::{LlmProvider, ProviderName, create_provider};
use crate::retrieval::estimate_tokens;
use crate::timeline::Timeline;

/// Partial-response label for deadline expiry.
const PARTIAL_TIMEOUT: &str = "timeout";
/// Partial-response label for an exhausted user quota.
const PARTIAL_BUDGET: &str = "budget_exceeded";
/// User id applied when the request carries none.
const ANONYMOUS_USER: &str = "anonymous";

static TRACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One request into the engine.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    /// Provider name; unknown names fall back to `default`.
    pub provider: String,
    /// The user query.
    pub message: String,
    /// Conversation id; derived from a minute-quantized clock if absent.
    pub conversation_id: Option<String>,
    /// User id for memory and quota accounting.
    pub user_id: Option<String>,
}

impl ChainRequest {
    /// Creates a request with defaults for the optional fields.
    #[must_use]
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            conversation_id: None,
            user_id: None,
        }
    }
}

/// The engine's reply.
#[derive(Debug, Clone, Serialize)]
pub struct ChainResponse {
    /// Final response text.
    pub text: String,
    /// Resolved provider name.
    pub provider: String,
    /// Tools that actually ran.
    pub tools_used: Vec<String>,
    /// Set when the response is partial (`timeout`, `budget_exceeded`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
    /// Judge quality of the returned text.
    pub quality: f64,
    /// Request trace id.
    pub trace_id: String,
}

struct ChainOutcome {
    text: String,
    partial: Option<String>,
    quality: f64,
}

/// Per-request orchestrator.
pub struct ChainScheduler {
    services: Arc<EngineServices>,
    registry: Arc<BrainRegistry>,
    conductor: ConductorStage,
    fetcher: ContextFetcherStage,
    gate: ToolGateStage,
    judge: JudgeStage,
    voice: VoiceStage,
}

impl ChainScheduler {
    /// Creates a scheduler over the shared services and registry.
    #[must_use]
    pub fn new(services: Arc<EngineServices>, registry: Arc<BrainRegistry>) -> Self {
        Self {
            services,
            registry,
            conductor: ConductorStage::new(),
            fetcher: ContextFetcherStage::new(),
            gate: ToolGateStage::new(),
            judge: JudgeStage::new(),
            voice: VoiceStage::new(),
        }
    }

    /// Handles one request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidProvider`] for an empty provider
    /// string, and [`EngineError::ChainExhausted`] when every stage
    /// failed and no fallback text exists. Everything else degrades
    /// into a (possibly partial) response.
    pub async fn handle(&self, request: ChainRequest) -> Result<ChainResponse, EngineError> {
        let provider_name = ProviderName::resolve(&request.provider)?;
        let provider = create_provider(provider_name, &self.services.config);

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(minute_conversation_id);
        let user_id = request
            .user_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_USER.to_string());
        let trace_id = next_trace_id();

        // State lifecycle: entry.
        self.services.supervisor.begin_request(&conversation_id);
        self.services
            .conversation_memory
            .open_session(&conversation_id, &user_id);
        self.services
            .working_memory
            .record_message(&user_id, &request.message);

        let mut pad = ScratchPad::new(
            trace_id.clone(),
            provider_name.as_str(),
            conversation_id.clone(),
            user_id.clone(),
            request.message.clone(),
        );
        let mut timeline = Timeline::start(trace_id.clone());
        let deadline = Instant::now() + self.services.config.request_deadline;

        info!(trace = %trace_id, provider = %provider_name, "request accepted");
        let outcome = self
            .run_chain(provider.as_ref(), &mut pad, &mut timeline, deadline)
            .await;

        // Guaranteed cleanup regardless of how the chain ended.
        self.finalize(&pad, timeline, &outcome);

        // Failures propagate only when no stage produced anything and no
        // fallback text exists; everything short of that degrades.
        if outcome.text.is_empty()
            && outcome.partial.is_none()
            && !request.message.trim().is_empty()
            && pad.stage_outputs.iter().all(|o| o.text.trim().is_empty())
        {
            return Err(EngineError::ChainExhausted {
                message: "no stage produced output and no fallback text exists".to_string(),
            });
        }

        Ok(ChainResponse {
            text: outcome.text,
            provider: provider_name.as_str().to_string(),
            tools_used: pad.tools_used(),
            partial: outcome.partial,
            quality: outcome.quality,
            trace_id,
        })
    }

    /// Runs the bounded ReAct loop.
    async fn run_chain(
        &self,
        provider: &dyn LlmProvider,
        pad: &mut ScratchPad,
        timeline: &mut Timeline,
        deadline: Instant,
    ) -> ChainOutcome {
        // Malformed (empty) queries are accepted as an empty response
        // candidate: no stage runs, the reply is empty.
        if pad.user_query.trim().is_empty() {
            return ChainOutcome {
                text: String::new(),
                partial: None,
                quality: 0.0,
            };
        }

        let max_iterations = self.services.config.max_iterations.max(1);
        let mut final_text = String::new();
        let mut partial: Option<String> = None;

        'iterations: for iteration in 0..max_iterations {
            pad.begin_iteration(iteration);

            if !self.services.quotas.has_remaining(&pad.user_id) {
                partial = Some(PARTIAL_BUDGET.to_string());
                final_text = self.merge_best_so_far(pad);
                break 'iterations;
            }

            // Conductor first; specialist selection happens at conductor
            // time per its nominations.
            if self
                .run_stage(&self.conductor, provider, pad, timeline, deadline, 6)
                .await
            {
                partial = Some(PARTIAL_TIMEOUT.to_string());
                final_text = self.merge_best_so_far(pad);
                break 'iterations;
            }

            let included = pad
                .conductor_plan
                .as_ref()
                .map(|p| p.included_specialists.clone())
                .unwrap_or_default();
            let specialists = self.registry.select(
                &pad.user_query,
                self.services.config.specialist_top_n,
                &included,
            );
            debug!(
                count = specialists.len(),
                "specialists selected for request"
            );

            let mut remaining: Vec<&dyn Stage> = Vec::with_capacity(specialists.len() + 4);
            remaining.push(&self.fetcher);
            remaining.push(&self.gate);
            for stage in &specialists {
                remaining.push(stage.as_ref());
            }
            remaining.push(&self.judge);
            remaining.push(&self.voice);

            let total = remaining.len();
            for (i, stage) in remaining.into_iter().enumerate() {
                if Instant::now() >= deadline {
                    partial = Some(PARTIAL_TIMEOUT.to_string());
                    final_text = self.merge_best_so_far(pad);
                    break 'iterations;
                }
                if self
                    .run_stage(stage, provider, pad, timeline, deadline, total - i)
                    .await
                {
                    partial = Some(PARTIAL_TIMEOUT.to_string());
                    final_text = self.merge_best_so_far(pad);
                    break 'iterations;
                }
            }

            final_text = pad
                .stage_outputs
                .iter()
                .rev()
                .find(|o| o.stage_name == "voice")
                .map(|o| o.text.clone())
                .unwrap_or_default();

            if !self.wants_another_pass(pad, iteration, max_iterations) {
                break 'iterations;
            }
            debug!(iteration, "judge verdict below threshold, re-iterating");
        }

        let quality = pad.judge_verdict.map_or(0.0, |v| v.quality);
        if final_text.is_empty() && partial.is_none() && !pad.user_query.trim().is_empty() {
            // Propagation policy: degrade to best-so-far before giving up.
            final_text = self.merge_best_so_far(pad);
        }
        ChainOutcome {
            text: final_text,
            partial,
            quality,
        }
    }

    /// Executes one stage under its share of the remaining deadline.
    ///
    /// Returns `true` when the request deadline is spent and later
    /// stages must not start. Failures demote to empty outputs.
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        provider: &dyn LlmProvider,
        pad: &mut ScratchPad,
        timeline: &mut Timeline,
        deadline: Instant,
        stages_left: usize,
    ) -> bool {
        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return true;
        }
        let stage_timeout = remaining / u32::try_from(stages_left.max(1)).unwrap_or(1);

        let started = timeline.begin_span();
        let result = tokio::time::timeout(stage_timeout, stage.run(provider, &self.services, pad)).await;

        let mut output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(failure)) => {
                warn!(stage = stage.name(), error = %failure, "stage failed, continuing with empty output");
                StageOutput::empty(stage.name())
            }
            Err(_) => {
                warn!(stage = stage.name(), timeout = ?stage_timeout, "stage timed out");
                StageOutput::empty(stage.name())
            }
        };
        output.elapsed_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        timeline.finish_span(stage.name(), started);

        if let Err(e) =
            self.services
                .supervisor
                .record(&pad.conversation_id, pad.iteration, output.clone())
        {
            // A stage running twice in one iteration violates the chain
            // contract; surface loudly but keep the request alive.
            warn!(error = %e, "supervisor rejected stage output");
        }
        if !output.text.is_empty() {
            self.services
                .working_memory
                .record_output(&pad.user_id, &output.stage_name, &output.text);
        }
        pad.stage_outputs.push(output);

        Instant::now() >= deadline
    }

    /// Whether the scheduler grants another pass. The Judge's verdict is
    /// necessary but not sufficient: the plan must exist, declare
    /// complexity ≥ 2 with required tools, and the iteration ceiling
    /// must not be reached.
    fn wants_another_pass(
        &self,
        pad: &ScratchPad,
        iteration: usize,
        max_iterations: usize,
    ) -> bool {
        if iteration + 1 >= max_iterations {
            return false;
        }
        let Some(verdict) = pad.judge_verdict else {
            return false;
        };
        if !verdict.wants_refine {
            return false;
        }
        pad.conductor_plan
            .as_ref()
            .is_some_and(|plan| plan.complexity >= 2 && !plan.required_tools.is_empty())
    }

    /// Best-so-far merge for short-circuit paths.
    fn merge_best_so_far(&self, pad: &ScratchPad) -> String {
        self.services.supervisor.merge(&pad.conversation_id).text
    }

    /// Records timeline, token usage, and the conversation exchange.
    fn finalize(&self, pad: &ScratchPad, timeline: Timeline, outcome: &ChainOutcome) {
        let tokens_in: u64 = pad
            .stage_outputs
            .iter()
            .map(|o| u64::from(o.tokens_in))
            .sum::<u64>()
            + u64::try_from(estimate_tokens(&pad.user_query)).unwrap_or(0);
        let tokens_out: u64 = pad
            .stage_outputs
            .iter()
            .map(|o| u64::from(o.tokens_out))
            .sum::<u64>()
            + u64::try_from(estimate_tokens(&outcome.text)).unwrap_or(0);
        self.services
            .quotas
            .record_usage(&pad.user_id, tokens_in, tokens_out);

        let (strategy, confidence) = pad
            .search_plan
            .as_ref()
            .map_or(("similarity_search", 0.0), |p| {
                (p.strategy.as_str(), p.confidence)
            });
        self.services.conversation_memory.record_exchange(
            &pad.conversation_id,
            &pad.user_id,
            &pad.user_query,
            &outcome.text,
            strategy,
            confidence,
        );

        self.services.profiler.record(timeline.into_snapshot());
    }
}

impl std::fmt::Debug for ChainScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainScheduler")
            .field("specialists", &self.registry.names())
            .finish()
    }
}

fn next_trace_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u128::from(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)))
        .unwrap_or(0);
    let seq = TRACE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("req-{millis}-{seq}")
}

fn minute_conversation_id() -> String {
    let minutes = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / 60)
        .unwrap_or(0);
    format!("conv-{minutes}")
}
