//! Per-user working memory.
//!
//! Four bounded FIFO ring buffers per user: recent messages, recent stage
//! outputs, intent history, and tone history. The service is a
//! process-wide concurrent map; retrieval returns read-only snapshots.

use std::collections::VecDeque;

use dashmap::DashMap;

/// Retained user messages per user.
const MAX_USER_MESSAGES: usize = 5;
/// Retained stage outputs per user.
const MAX_STAGE_OUTPUTS: usize = 3;
/// Retained intents per user.
const MAX_INTENTS: usize = 10;
/// Retained tones per user.
const MAX_TONES: usize = 10;
/// Stage output text is truncated to this length before retention.
const STAGE_OUTPUT_TRUNCATE: usize = 400;

/// One remembered stage output.
#[derive(Debug, Clone)]
pub struct RememberedOutput {
    /// Producing stage.
    pub stage: String,
    /// Truncated output text.
    pub text: String,
}

/// Mutable per-user state. All buffers evict FIFO.
#[derive(Debug, Default)]
struct UserMemory {
    messages: VecDeque<String>,
    outputs: VecDeque<RememberedOutput>,
    intents: VecDeque<String>,
    tones: VecDeque<String>,
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, cap: usize) {
    buffer.push_back(value);
    while buffer.len() > cap {
        buffer.pop_front();
    }
}

/// Read-only snapshot of one user's working memory.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemorySnapshot {
    /// Most recent user messages, oldest first.
    pub messages: Vec<String>,
    /// Most recent stage outputs, oldest first.
    pub outputs: Vec<RememberedOutput>,
    /// Intent history, oldest first.
    pub intents: Vec<String>,
    /// Tone history, oldest first.
    pub tones: Vec<String>,
}

/// Process-wide, thread-safe working memory keyed by user.
#[derive(Debug, Default)]
pub struct WorkingMemoryService {
    users: DashMap<String, UserMemory>,
}

impl WorkingMemoryService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a user turn.
    pub fn record_message(&self, user_id: &str, message: &str) {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        push_bounded(&mut entry.messages, message.to_string(), MAX_USER_MESSAGES);
    }

    /// Records a stage output, truncated for retention.
    pub fn record_output(&self, user_id: &str, stage: &str, text: &str) {
        let mut truncated = text.to_string();
        if truncated.len() > STAGE_OUTPUT_TRUNCATE {
            let mut cut = STAGE_OUTPUT_TRUNCATE;
            while !truncated.is_char_boundary(cut) {
                cut -= 1;
            }
            truncated.truncate(cut);
        }
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        push_bounded(
            &mut entry.outputs,
            RememberedOutput {
                stage: stage.to_string(),
                text: truncated,
            },
            MAX_STAGE_OUTPUTS,
        );
    }

    /// Records a classified intent.
    pub fn record_intent(&self, user_id: &str, intent: &str) {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        push_bounded(&mut entry.intents, intent.to_string(), MAX_INTENTS);
    }

    /// Records a detected tone.
    pub fn record_tone(&self, user_id: &str, tone: &str) {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        push_bounded(&mut entry.tones, tone.to_string(), MAX_TONES);
    }

    /// Snapshot of one user's memory; empty when unknown.
    #[must_use]
    pub fn snapshot(&self, user_id: &str) -> WorkingMemorySnapshot {
        self.users
            .get(user_id)
            .map(|m| WorkingMemorySnapshot {
                messages: m.messages.iter().cloned().collect(),
                outputs: m.outputs.iter().cloned().collect(),
                intents: m.intents.iter().cloned().collect(),
                tones: m.tones.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }

    /// Clears one user's memory.
    pub fn clear(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    /// Number of tracked users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ring_bounded_at_five() {
        let service = WorkingMemoryService::new();
        for i in 0..12 {
            service.record_message("u1", &format!("m{i}"));
        }
        let snapshot = service.snapshot("u1");
        assert_eq!(snapshot.messages.len(), 5);
        // FIFO: oldest surviving entry is m7.
        assert_eq!(snapshot.messages.first().map(String::as_str), Some("m7"));
        assert_eq!(snapshot.messages.last().map(String::as_str), Some("m11"));
    }

    #[test]
    fn test_output_ring_bounded_at_three() {
        let service = WorkingMemoryService::new();
        for i in 0..6 {
            service.record_output("u1", "judge", &format!("o{i}"));
        }
        assert_eq!(service.snapshot("u1").outputs.len(), 3);
    }

    #[test]
    fn test_intent_and_tone_rings_bounded_at_ten() {
        let service = WorkingMemoryService::new();
        for i in 0..25 {
            service.record_intent("u1", &format!("i{i}"));
            service.record_tone("u1", &format!("t{i}"));
        }
        let snapshot = service.snapshot("u1");
        assert_eq!(snapshot.intents.len(), 10);
        assert_eq!(snapshot.tones.len(), 10);
    }

    #[test]
    fn test_output_truncated() {
        let service = WorkingMemoryService::new();
        service.record_output("u1", "voice", &"x".repeat(2000));
        let snapshot = service.snapshot("u1");
        assert!(snapshot.outputs[0].text.len() <= STAGE_OUTPUT_TRUNCATE);
    }

    #[test]
    fn test_users_isolated() {
        let service = WorkingMemoryService::new();
        service.record_message("u1", "hello");
        service.record_message("u2", "world");
        assert_eq!(service.snapshot("u1").messages, vec!["hello"]);
        assert_eq!(service.snapshot("u2").messages, vec!["world"]);
    }

    #[test]
    fn test_unknown_user_snapshot_empty() {
        let service = WorkingMemoryService::new();
        let snapshot = service.snapshot("ghost");
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.outputs.is_empty());
    }

    #[test]
    fn test_clear() {
        let service = WorkingMemoryService::new();
        service.record_message("u1", "hello");
        service.clear("u1");
        assert!(service.snapshot("u1").messages.is_empty());
        assert_eq!(service.user_count(), 0);
    }
}
