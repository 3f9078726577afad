//! Conductor: plans the request and approves tools.
//!
//! First core stage of every request. Builds the retrieval plan, runs
//! tool discovery over the catalog, approves the subset whose family
//! triggers appear in the query, estimates complexity, and nominates
//! specialists for the scheduler to include.

use async_trait::async_trait;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ConductorPlan, ScratchPad, StageOutput};
use crate::chain::stage::{Stage, StageRole};
use crate::error::StageFailure;
use crate::llm::LlmProvider;
use crate::retrieval::Strategy;

/// Tools surfaced by discovery per request.
const DISCOVERY_TOP_K: usize = 3;

/// Per-tool trigger words that justify approval.
const TOOL_TRIGGERS: &[(&str, &[&str])] = &[
    ("weather", &["weather", "forecast", "temperature"]),
    ("datetime", &["time", "date", "day", "today", "tomorrow"]),
    ("calendar", &["calendar", "meeting", "schedule", "remind"]),
];

/// The conductor stage.
#[derive(Debug, Default)]
pub struct ConductorStage {
    _private: (),
}

impl ConductorStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    fn detect_tone(query: &str) -> &'static str {
        if query.contains('!') {
            "urgent"
        } else if query.contains('?') {
            "inquisitive"
        } else {
            "neutral"
        }
    }

    fn complexity(query: &str, strategy: Strategy, entities: usize, tools: usize) -> u8 {
        let mut complexity = 1u8;
        if query.split_whitespace().count() > 8 {
            complexity += 1;
        }
        if matches!(strategy, Strategy::ErrorTrace | Strategy::DependencyGraph) {
            complexity += 1;
        }
        if entities > 0 {
            complexity += 1;
        }
        if tools > 0 {
            complexity += 1;
        }
        complexity.min(5)
    }

    fn nominate_specialists(strategy: Strategy) -> Vec<String> {
        match strategy {
            Strategy::ErrorTrace => vec!["error_analyst".to_string()],
            Strategy::DependencyGraph => vec!["design_advisor".to_string()],
            Strategy::MethodFocused | Strategy::EntityCentered => {
                vec!["code_explainer".to_string()]
            }
            Strategy::ConfigurationChain | Strategy::SimilaritySearch => Vec::new(),
        }
    }
}

#[async_trait]
impl Stage for ConductorStage {
    fn name(&self) -> &'static str {
        "conductor"
    }

    fn description(&self) -> &'static str {
        "builds the request plan and approves tools"
    }

    fn role(&self) -> StageRole {
        StageRole::Core
    }

    async fn run(
        &self,
        _provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        let plan = services
            .planner
            .plan(&pad.user_query, services.config.planner_token_budget());

        let suggested = services
            .tool_catalog
            .discover(&pad.user_query, DISCOVERY_TOP_K);
        let query_lower = pad.user_query.to_lowercase();
        let approved: Vec<String> = suggested
            .iter()
            .filter(|name| {
                TOOL_TRIGGERS
                    .iter()
                    .find(|(tool, _)| tool == &name.as_str())
                    .is_some_and(|(_, triggers)| {
                        triggers.iter().any(|t| query_lower.contains(t))
                    })
            })
            .cloned()
            .collect();

        let complexity = Self::complexity(
            &pad.user_query,
            plan.strategy,
            plan.target_entities.len(),
            approved.len(),
        );

        let conductor_plan = ConductorPlan {
            complexity,
            required_tools: approved.clone(),
            included_specialists: Self::nominate_specialists(plan.strategy),
        };

        services
            .working_memory
            .record_intent(&pad.user_id, plan.strategy.as_str());
        services
            .working_memory
            .record_tone(&pad.user_id, Self::detect_tone(&pad.user_query));

        let text = format!(
            "strategy={} complexity={} tools=[{}]",
            plan.strategy,
            complexity,
            approved.join(", ")
        );

        pad.search_plan = Some(plan);
        pad.suggested_tools = suggested;
        pad.approved_tools = approved;
        pad.conductor_plan = Some(conductor_plan);

        Ok(StageOutput::new(self.name(), text, 0.2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;

    async fn run(query: &str) -> ScratchPad {
        let stage = ConductorStage::new();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", query);
        stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        pad
    }

    #[tokio::test]
    async fn test_writes_plan_and_conductor_plan() {
        let pad = run("explain CacheManager").await;
        let plan = pad.search_plan.as_ref().unwrap_or_else(|| unreachable!());
        assert_eq!(plan.strategy, Strategy::EntityCentered);
        let conductor = pad.conductor_plan.as_ref().unwrap_or_else(|| unreachable!());
        assert!(conductor.complexity >= 2);
        assert_eq!(conductor.included_specialists, vec!["code_explainer"]);
    }

    #[tokio::test]
    async fn test_weather_query_approves_weather_tool() {
        let pad = run("what is the weather forecast in Paris").await;
        assert!(pad.approved_tools.contains(&"weather".to_string()));
        // Approved is always a subset of suggested.
        for tool in &pad.approved_tools {
            assert!(pad.suggested_tools.contains(tool));
        }
    }

    #[tokio::test]
    async fn test_plain_query_approves_nothing() {
        let pad = run("explain the eviction policy").await;
        assert!(pad.approved_tools.is_empty());
    }

    #[tokio::test]
    async fn test_tone_and_intent_recorded() {
        let stage = ConductorStage::new();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u42", "what is this?");
        stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        let snapshot = services.working_memory.snapshot("u42");
        assert_eq!(snapshot.intents.len(), 1);
        assert_eq!(snapshot.tones, vec!["inquisitive"]);
    }

    #[test]
    fn test_complexity_scales() {
        assert_eq!(
            ConductorStage::complexity("short", Strategy::SimilaritySearch, 0, 0),
            1
        );
        let complex = ConductorStage::complexity(
            "a very long query with many words about failures everywhere",
            Strategy::ErrorTrace,
            1,
            1,
        );
        assert_eq!(complex, 5);
    }
}
