//! Voice: final text normalization.
//!
//! Last core stage. Takes the merged candidate (or the best raw stage
//! output when no merge exists), normalizes whitespace, and emits the
//! text the scheduler returns to the caller. An empty query yields an
//! empty reply.

use async_trait::async_trait;

use crate::chain::EngineServices;
use crate::chain::scratchpad::{ScratchPad, StageOutput};
use crate::chain::stage::{Stage, StageRole};
use crate::error::StageFailure;
use crate::llm::LlmProvider;

/// The voice stage.
#[derive(Debug, Default)]
pub struct VoiceStage {
    _private: (),
}

impl VoiceStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Collapses runs of blank lines and trims trailing space.
    fn normalize(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut blank_run = 0usize;
        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            out.push_str(trimmed);
            out.push('\n');
        }
        out.trim().to_string()
    }
}

#[async_trait]
impl Stage for VoiceStage {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn description(&self) -> &'static str {
        "normalizes the final response text"
    }

    fn role(&self) -> StageRole {
        StageRole::Core
    }

    async fn run(
        &self,
        _provider: &dyn LlmProvider,
        _services: &EngineServices,
        pad: &mut ScratchPad,
    ) -> Result<StageOutput, StageFailure> {
        let source = pad
            .merged_output
            .as_ref()
            .map(|m| m.text.clone())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                pad.stage_outputs
                    .iter()
                    .filter(|o| !o.text.trim().is_empty())
                    .max_by(|a, b| {
                        a.quality
                            .partial_cmp(&b.quality)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|o| o.text.clone())
            })
            .unwrap_or_default();

        let text = Self::normalize(&source);
        let quality = pad.judge_verdict.map_or(0.5, |v| v.quality);
        Ok(StageOutput::new(self.name(), text, quality))
    }
}
