//! Stage ("brain") contract.
//!
//! Every unit of work in the chain is a value implementing [`Stage`]:
//! a name, a description indexed for semantic selection, an order, and a
//! `run` over the shared scratchpad. The registry is populated explicitly
//! at startup; selection is data-driven, never reflective.

use async_trait::async_trait;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ScratchPad, StageOutput};
use crate::error::StageFailure;
use crate::llm::LlmProvider;

/// Execution role of a stage within the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    /// Runs on every request in a fixed position.
    Core,
    /// Selected per request by description similarity.
    Specialist,
}

/// A named, ordered unit of work executed by the scheduler.
///
/// Stages are stateless values; request state flows through the
/// [`ScratchPad`] and long-lived services through [`EngineServices`].
/// Stages must not hold locks across their awaits: the scheduler runs
/// them one at a time per request, but blocking calls (LLM, vector
/// store) suspend.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for ordering, logging, and supervision.
    fn name(&self) -> &'static str;

    /// Description indexed in the vector index for specialist selection.
    fn description(&self) -> &'static str;

    /// Position among specialists; core stages ignore it. Ties break by
    /// registration order.
    fn order(&self) -> i32 {
        0
    }

    /// Whether this stage is core or a selectable specialist.
    fn role(&self) -> StageRole {
        StageRole::Specialist
    }

    /// Executes the stage against the shared scratchpad.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure`] on dependency or internal failure. The
    /// scheduler demotes failures to empty outputs and continues the
    /// chain.
    async fn run(
        &self,
        provider: &dyn LlmProvider,
        services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    #[async_trait]
    impl Stage for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn description(&self) -> &'static str {
            "test probe stage"
        }

        async fn run(
            &self,
            _provider: &dyn LlmProvider,
            _services: &EngineServices,
            pad: &mut ScratchPad,
        ) -> Result<StageOutput, StageFailure> {
            Ok(StageOutput::new("probe", pad.user_query.clone(), 0.5))
        }
    }

    #[test]
    fn test_default_role_and_order() {
        let stage = Probe;
        assert_eq!(stage.role(), StageRole::Specialist);
        assert_eq!(stage.order(), 0);
    }

    #[tokio::test]
    async fn test_stage_reads_pad() {
        let stage = Probe;
        let services = EngineServices::for_tests();
        let provider = crate::llm::EchoProvider::new();
        let mut pad = ScratchPad::new("t", "default", "c", "u", "hello");
        let output = stage
            .run(&provider, &services, &mut pad)
            .await
            .unwrap_or_else(|e| unreachable!("run: {e}"));
        assert_eq!(output.text, "hello");
    }
}
