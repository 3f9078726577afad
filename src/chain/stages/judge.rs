//! Judge: quality evaluation over the merged chain output.
//!
//! Merges the iteration's stage outputs through the supervisor, runs the
//! consistency and hallucination gates over the merged text, and folds
//! everything into one quality score. The verdict lands on the
//! scratchpad; whether another iteration actually runs is the
//! scheduler's decision, not the Judge's.

use async_trait::async_trait;
use tracing::debug;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{JudgeVerdict, ScratchPad, StageOutput};
use crate::chain::stage::{Stage, StageRole};
use crate::error::StageFailure;
use crate::llm::LlmProvider;

/// Quality multiplier when the hallucination gate withholds trust.
const UNTRUSTED_PENALTY: f64 = 0.6;

/// The judge stage.
#[derive(Debug, Default)]
pub struct JudgeStage {
    _private: (),
}

impl JudgeStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[async_trait]
impl Stage for JudgeStage {
    fn name(&self) -> &'static str {
        "judge"
    }

    fn description(&self) -> &'static str {
        "evaluates merged output quality and requests refinement"
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
        let merged = services.supervisor.merge(&pad.conversation_id);

        let quality = if merged.text.trim().is_empty() {
            0.0
        } else {
            let consistency = services.consistency.check(&merged.text);
            let hallucination = services.hallucination.check(&merged.text);

            let mut quality = merged.average_quality.mul_add(
                0.5,
                consistency.score.mul_add(0.25, (1.0 - hallucination.score) * 0.25),
            );
            if !hallucination.trusted {
                quality *= UNTRUSTED_PENALTY;
            }

            pad.consistency = Some(consistency);
            pad.hallucination = Some(hallucination);
            quality.clamp(0.0, 1.0)
        };

        let wants_refine = quality < services.config.quality_threshold;
        // Advisory only; the scheduler owns the iteration decision.
        let advisory = services
            .supervisor
            .should_reevaluate(&pad.conversation_id, quality);
        debug!(
            quality = format!("{quality:.2}"),
            wants_refine, advisory, "judge verdict"
        );

        pad.merged_output = Some(merged);
        pad.judge_verdict = Some(JudgeVerdict {
            quality,
            wants_refine,
        });

        // Empty text keeps the verdict itself out of future merges.
        Ok(StageOutput::new(self.name(), "", quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;

    async fn judge_with_outputs(outputs: Vec<(&str, &str, f64)>) -> ScratchPad {
        let services = EngineServices::for_tests();
        services.supervisor.begin_request("c1");
        for (stage, text, quality) in outputs {
            services
                .supervisor
                .record("c1", 0, StageOutput::new(stage, text, quality))
                .unwrap_or_else(|e| unreachable!("record: {e}"));
        }
        let mut pad = ScratchPad::new("t", "default", "c1", "u", "query");
        JudgeStage::new()
            .run(&EchoProvider::new(), &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        pad
    }

    #[tokio::test]
    async fn test_no_outputs_zero_quality_wants_refine() {
        let pad = judge_with_outputs(Vec::new()).await;
        let verdict = pad.judge_verdict.unwrap_or_default();
        assert!(verdict.quality.abs() < f64::EPSILON);
        assert!(verdict.wants_refine);
    }

    #[tokio::test]
    async fn test_good_outputs_high_quality() {
        let pad = judge_with_outputs(vec![
            (
                "a",
                "The cache evicts entries because memory is bounded, therefore eviction runs hourly.",
                0.95,
            ),
            (
                "b",
                "The cache evicts entries because memory is bounded, therefore eviction runs hourly.",
                0.9,
            ),
        ])
        .await;
        let verdict = pad.judge_verdict.unwrap_or_default();
        assert!(verdict.quality > 0.75, "quality was {}", verdict.quality);
        assert!(!verdict.wants_refine);
        assert!(pad.merged_output.is_some());
        assert!(pad.consistency.is_some());
        assert!(pad.hallucination.is_some());
    }

    #[tokio::test]
    async fn test_hallucinated_output_penalized() {
        let trusted = judge_with_outputs(vec![(
            "a",
            "The scheduler runs stages in order because the pad is shared.",
            0.9,
        )])
        .await;
        let suspect = judge_with_outputs(vec![(
            "a",
            "This is definitely guaranteed, everyone knows the scheduler always works.",
            0.9,
        )])
        .await;
        let q_trusted = trusted.judge_verdict.unwrap_or_default().quality;
        let q_suspect = suspect.judge_verdict.unwrap_or_default().quality;
        assert!(q_suspect < q_trusted);
    }

    #[tokio::test]
    async fn test_judge_output_text_empty() {
        let services = EngineServices::for_tests();
        services.supervisor.begin_request("c1");
        let mut pad = ScratchPad::new("t", "default", "c1", "u", "query");
        let output = JudgeStage::new()
            .run(&EchoProvider::new(), &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        assert!(output.text.is_empty());
    }
}
