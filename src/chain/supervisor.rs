//! Supervision: output accumulation, merging, and re-evaluation gating.
//!
//! The supervisor keeps a conversation-keyed record of stage outputs.
//! `merge` concatenates the top three outputs by quality; `consistency`
//! reports mean pairwise Jaccard similarity and flags divergent pairs.
//! Its re-evaluation gate is advisory; the scheduler enforces its own
//! hard ceiling.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::chain::scratchpad::{MergedOutput, StageOutput};
use crate::error::EngineError;

/// Outputs merged into the final candidate.
const MERGE_TOP_K: usize = 3;
/// Quality below which re-evaluation is advised.
const REEVALUATE_BELOW: f64 = 0.75;
/// Pairs below this similarity are flagged as divergent.
const DIVERGENT_PAIR_THRESHOLD: f64 = 0.5;

/// A divergent output pair.
#[derive(Debug, Clone)]
pub struct DivergentPair {
    /// First stage.
    pub first: String,
    /// Second stage.
    pub second: String,
    /// Jaccard similarity of their outputs.
    pub similarity: f64,
}

/// Inter-output consistency summary.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyOutcome {
    /// Mean pairwise similarity; 1.0 when fewer than two outputs.
    pub mean_similarity: f64,
    /// Pairs below the divergence threshold.
    pub divergent_pairs: Vec<DivergentPair>,
}

#[derive(Debug, Default)]
struct ConversationState {
    outputs: Vec<StageOutput>,
    seen: HashSet<(String, usize)>,
    reeval_cycles: usize,
}

/// Conversation-keyed supervisor.
#[derive(Debug, Default)]
pub struct Supervisor {
    conversations: DashMap<String, ConversationState>,
    max_reevaluations: usize,
}

impl Supervisor {
    /// Creates a supervisor with the given re-evaluation ceiling.
    #[must_use]
    pub fn new(max_reevaluations: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            max_reevaluations,
        }
    }

    /// Resets per-request accumulation for a conversation.
    pub fn begin_request(&self, conversation_id: &str) {
        let mut state = self.conversations.entry(conversation_id.to_string()).or_default();
        state.outputs.clear();
        state.seen.clear();
        state.reeval_cycles = 0;
    }

    /// Records a stage output.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateStageOutput`] when the same stage
    /// is recorded twice within one iteration of a request.
    pub fn record(
        &self,
        conversation_id: &str,
        iteration: usize,
        output: StageOutput,
    ) -> Result<(), EngineError> {
        let mut state = self.conversations.entry(conversation_id.to_string()).or_default();
        let key = (output.stage_name.clone(), iteration);
        if !state.seen.insert(key) {
            return Err(EngineError::DuplicateStageOutput {
                stage: output.stage_name,
                iteration,
            });
        }
        state.outputs.push(output);
        Ok(())
    }

    /// Merges the top outputs by quality into one candidate.
    ///
    /// Non-empty texts are sorted quality-descending, the top three are
    /// concatenated with a blank line, and the average quality of the
    /// merged contributors is reported.
    #[must_use]
    pub fn merge(&self, conversation_id: &str) -> MergedOutput {
        let Some(state) = self.conversations.get(conversation_id) else {
            return MergedOutput::default();
        };
        let mut candidates: Vec<&StageOutput> = state
            .outputs
            .iter()
            .filter(|o| !o.text.trim().is_empty())
            .collect();
        candidates.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(MERGE_TOP_K);

        if candidates.is_empty() {
            return MergedOutput::default();
        }

        let text = candidates
            .iter()
            .map(|o| o.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        #[allow(clippy::cast_precision_loss)]
        let average_quality =
            candidates.iter().map(|o| o.quality).sum::<f64>() / candidates.len() as f64;

        MergedOutput {
            text,
            average_quality,
        }
    }

    /// Pairwise consistency over the recorded outputs.
    #[must_use]
    pub fn consistency(&self, conversation_id: &str) -> ConsistencyOutcome {
        let Some(state) = self.conversations.get(conversation_id) else {
            return ConsistencyOutcome {
                mean_similarity: 1.0,
                divergent_pairs: Vec::new(),
            };
        };
        let outputs: Vec<&StageOutput> = state
            .outputs
            .iter()
            .filter(|o| !o.text.trim().is_empty())
            .collect();
        if outputs.len() < 2 {
            return ConsistencyOutcome {
                mean_similarity: 1.0,
                divergent_pairs: Vec::new(),
            };
        }

        let token_sets: Vec<HashSet<String>> = outputs
            .iter()
            .map(|o| {
                o.text
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        let mut total = 0.0;
        let mut pairs = 0usize;
        let mut divergent = Vec::new();
        for i in 0..outputs.len() {
            for j in (i + 1)..outputs.len() {
                let similarity = jaccard(&token_sets[i], &token_sets[j]);
                total += similarity;
                pairs += 1;
                if similarity < DIVERGENT_PAIR_THRESHOLD {
                    divergent.push(DivergentPair {
                        first: outputs[i].stage_name.clone(),
                        second: outputs[j].stage_name.clone(),
                        similarity,
                    });
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mean_similarity = if pairs == 0 { 1.0 } else { total / pairs as f64 };
        ConsistencyOutcome {
            mean_similarity,
            divergent_pairs: divergent,
        }
    }

    /// Advisory re-evaluation gate: `true` when quality falls short and
    /// cycles remain. Consumes one cycle when it advises re-evaluation.
    pub fn should_reevaluate(&self, conversation_id: &str, current_quality: f64) -> bool {
        let mut state = self.conversations.entry(conversation_id.to_string()).or_default();
        if current_quality < REEVALUATE_BELOW && state.reeval_cycles < self.max_reevaluations {
            state.reeval_cycles += 1;
            true
        } else {
            false
        }
    }

    /// Re-evaluation cycles consumed for a conversation.
    #[must_use]
    pub fn reeval_cycles(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map_or(0, |s| s.reeval_cycles)
    }

    /// Drops a conversation's accumulated state.
    pub fn clear(&self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    /// Recorded output count for a conversation.
    #[must_use]
    pub fn output_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map_or(0, |s| s.outputs.len())
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union as f64;
    score
}
