//! Built-in specialist stages.
//!
//! Each specialist is an LLM-backed brain with a fixed system prompt and
//! an order slot. All of them read the assembled code context and the
//! tool outcomes from the scratchpad; none of them write shared slots
//! beyond their own stage output.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ScratchPad, StageOutput};
use crate::chain::stage::Stage;
use crate::error::StageFailure;
use crate::llm::{ChatRequest, LlmProvider, system_message, user_message};

/// Characters of code context included in specialist prompts.
const CONTEXT_PROMPT_CHARS: usize = 4_000;
/// Specialist response token ceiling.
const SPECIALIST_MAX_TOKENS: u32 = 1_024;
/// Base quality for a successful specialist response.
const BASE_QUALITY: f64 = 0.6;

/// Renders the scratchpad's retrieval context into a prompt block,
/// summaries first.
fn context_block(pad: &ScratchPad) -> String {
    let mut block = String::new();
    if let Some(context) = &pad.code_context {
        for doc in &context.file_summaries {
            block.push_str(&doc.text);
            block.push('\n');
        }
        for doc in &context.code_chunks {
            block.push_str(&doc.text);
            block.push('\n');
        }
    }
    for outcome in &pad.tool_outcomes {
        block.push_str(&outcome.output);
        block.push('\n');
    }
    if block.len() > CONTEXT_PROMPT_CHARS {
        let mut cut = CONTEXT_PROMPT_CHARS;
        while !block.is_char_boundary(cut) {
            cut -= 1;
        }
        block.truncate(cut);
    }
    block
}

/// Shared LLM execution for every built-in specialist.
async fn run_specialist(
    name: &'static str,
    system_prompt: &str,
    provider: &dyn LlmProvider,
    services: &EngineServices,
    pad: &ScratchPad,
) -> Result<StageOutput, StageFailure> {
    let context = context_block(pad);
    let user_msg = if context.is_empty() {
        pad.user_query.clone()
    } else {
        format!("{}\n\nContext:\n{context}", pad.user_query)
    };

    let request = ChatRequest {
        model: services.config.model.clone(),
        messages: vec![system_message(system_prompt), user_message(&user_msg)],
        temperature: Some(0.2),
        max_tokens: Some(SPECIALIST_MAX_TOKENS),
        json_mode: false,
        stream: false,
        tool_names: pad.approved_tools.clone(),
    };

    let response = provider
        .chat(&request)
        .await
        .map_err(|e| StageFailure::Dependency {
            stage: name.to_string(),
            message: e.to_string(),
        })?;

    let mut quality = BASE_QUALITY;
    if pad
        .code_context
        .as_ref()
        .is_some_and(|c| !c.file_summaries.is_empty() || !c.code_chunks.is_empty())
    {
        quality += 0.15;
    }
    if response.content.len() > 80 {
        quality += 0.1;
    }

    let mut output = StageOutput::new(name, response.content, quality.min(0.95));
    output.tokens_in = response.usage.prompt_tokens;
    output.tokens_out = response.usage.completion_tokens;
    Ok(output)
}

/// Explains classes and methods from the retrieved context.
#[derive(Debug, Default)]
pub struct CodeExplainer {
    _private: (),
}

#[async_trait]
impl Stage for CodeExplainer {
    fn name(&self) -> &'static str {
        "code_explainer"
    }

    fn description(&self) -> &'static str {
        "explains code classes methods implementation details from retrieved context"
    }

    fn order(&self) -> i32 {
        10
    }

    async fn run(
        &self,
        provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        run_specialist(
            self.name(),
            "You explain source code precisely. Ground every statement in the \
             provided context and name the classes and methods you reference.",
            provider,
            services,
            pad,
        )
        .await
    }
}

/// Diagnoses errors and failure paths.
#[derive(Debug, Default)]
pub struct ErrorAnalyst {
    _private: (),
}

#[async_trait]
impl Stage for ErrorAnalyst {
    fn name(&self) -> &'static str {
        "error_analyst"
    }

    fn description(&self) -> &'static str {
        "diagnoses errors exceptions stack traces and failure propagation"
    }

    fn order(&self) -> i32 {
        20
    }

    async fn run(
        &self,
        provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        run_specialist(
            self.name(),
            "You diagnose failures. Trace the error path through the provided \
             context, name the failing call site, and state the most likely cause.",
            provider,
            services,
            pad,
        )
        .await
    }
}

/// Reviews architecture and dependency structure.
#[derive(Debug, Default)]
pub struct DesignAdvisor {
    _private: (),
}

#[async_trait]
impl Stage for DesignAdvisor {
    fn name(&self) -> &'static str {
        "design_advisor"
    }

    fn description(&self) -> &'static str {
        "reviews architecture design structure and dependency layering"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn run(
        &self,
        provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        run_specialist(
            self.name(),
            "You review software structure. Describe how the components in the \
             provided context depend on each other and flag layering concerns.",
            provider,
            services,
            pad,
        )
        .await
    }
}

/// The default specialist set, ready for registry wiring.
#[must_use]
pub fn default_specialists() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(CodeExplainer::default()),
        Arc::new(ErrorAnalyst::default()),
        Arc::new(DesignAdvisor::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;
    use crate::retrieval::CodeContext;
    use crate::vector::Document;

    #[tokio::test]
    async fn test_specialist_echoes_query_through_provider() {
        let stage = CodeExplainer::default();
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", "explain the cache");
        let output = stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        assert!(output.text.contains("explain the cache"));
        assert!(output.quality >= BASE_QUALITY);
    }

    #[tokio::test]
    async fn test_context_raises_quality() {
        let services = EngineServices::for_tests();
        let provider = EchoProvider::new();

        let mut bare = ScratchPad::new("t", "default", "c", "u", "q");
        let bare_quality = ErrorAnalyst::default()
            .run(&provider, &services, &mut bare)
            .await
            .map(|o| o.quality)
            .unwrap_or_default();

        let mut rich = ScratchPad::new("t", "default", "c", "u", "q");
        rich.code_context = Some(CodeContext {
            file_summaries: vec![Document::new("summary text", [("filename", "A.java")])],
            ..CodeContext::default()
        });
        let rich_quality = ErrorAnalyst::default()
            .run(&provider, &services, &mut rich)
            .await
            .map(|o| o.quality)
            .unwrap_or_default();

        assert!(rich_quality > bare_quality);
    }

    #[tokio::test]
    async fn test_context_block_orders_summaries_before_chunks() {
        let mut pad = ScratchPad::new("t", "default", "c", "u", "q");
        pad.code_context = Some(CodeContext {
            file_summaries: vec![Document::new("SUMMARY", [("filename", "A.java")])],
            code_chunks: vec![Document::new("CHUNK", [("filename", "A.java")])],
            ..CodeContext::default()
        });
        let block = context_block(&pad);
        let summary_pos = block.find("SUMMARY").unwrap_or(usize::MAX);
        let chunk_pos = block.find("CHUNK").unwrap_or(0);
        assert!(summary_pos < chunk_pos);
    }

    #[test]
    fn test_default_specialists_ordered() {
        let specialists = default_specialists();
        assert_eq!(specialists.len(), 3);
        let orders: Vec<i32> = specialists.iter().map(|s| s.order()).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        assert_eq!(orders, sorted);
    }
}
