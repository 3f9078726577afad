//! Context fetcher: executes the retrieval plan.
//!
//! Invokes the code retriever with the conductor's plan, writes the
//! assembled context to the scratchpad, and widens tool discovery with
//! retrieval-aware suggestions.

use async_trait::async_trait;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ScratchPad, StageOutput};
use crate::chain::stage::{Stage, StageRole};
use crate::error::StageFailure;
use crate::llm::LlmProvider;

/// Additional tool suggestions surfaced at fetch time.
const EXTRA_DISCOVERY_TOP_K: usize = 2;

/// The context-fetcher stage.
#[derive(Debug, Default)]
pub struct ContextFetcherStage {
    _private: (),
}

impl ContextFetcherStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[async_trait]
impl Stage for ContextFetcherStage {
    fn name(&self) -> &'static str {
        "context_fetcher"
    }

    fn description(&self) -> &'static str {
        "retrieves code context for the request plan"
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
        let context = match pad.search_plan.as_ref() {
            Some(plan) => services.retriever.retrieve_with_plan(plan),
            None => services
                .retriever
                .retrieve(&pad.user_query, services.config.planner_token_budget()),
        }
        .map_err(|e| StageFailure::Dependency {
            stage: self.name().to_string(),
            message: e.to_string(),
        })?;

        // Discovery widens the suggestion set; approval never widens.
        for name in services
            .tool_catalog
            .discover(&pad.user_query, EXTRA_DISCOVERY_TOP_K)
        {
            if !pad.suggested_tools.contains(&name) {
                pad.suggested_tools.push(name);
            }
        }

        let text = format!(
            "context: {} summaries, {} chunks, {} files, {} tokens",
            context.file_summaries.len(),
            context.code_chunks.len(),
            context.relevant_files.len(),
            context.tokens_used
        );
        pad.code_context = Some(context);

        Ok(StageOutput::new(self.name(), text, 0.25))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;

    #[tokio::test]
    async fn test_writes_code_context() {
        let stage = ContextFetcherStage::new();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", "explain caching");
        let output = stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        assert!(pad.code_context.is_some());
        assert!(output.text.starts_with("context:"));
    }

    #[tokio::test]
    async fn test_uses_existing_plan_strategy() {
        let stage = ContextFetcherStage::new();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", "explain CacheManager");
        pad.search_plan = Some(
            services
                .planner
                .plan("explain CacheManager", 4000),
        );
        stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        let context = pad.code_context.as_ref().unwrap_or_else(|| unreachable!());
        assert_eq!(context.strategy, "entity_centered");
    }

    #[tokio::test]
    async fn test_extends_suggested_tools_without_duplicates() {
        let stage = ContextFetcherStage::new();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", "weather forecast today");
        pad.suggested_tools.push("weather".to_string());
        stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        let count = pad
            .suggested_tools
            .iter()
            .filter(|t| t.as_str() == "weather")
            .count();
        assert_eq!(count, 1);
    }
}
