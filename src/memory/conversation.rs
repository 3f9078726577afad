//! Per-session conversation memory with long-term promotion.
//!
//! Each session keeps its last 20 exchanges; exchanges with high planner
//! confidence touching durable topics are promoted into a process-wide
//! long-term store capped at 100 entries. Eviction runs by ascending
//! importance immediately after each insert, so a promotion may displace
//! the least important entry but never the one just added. A periodic
//! sweep drops sessions idle for more than 24 hours.

use std::collections::VecDeque;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Exchanges retained per session.
const MAX_EXCHANGES: usize = 20;
/// Long-term store capacity.
const MAX_LONG_TERM: usize = 100;
/// Confidence above which an exchange is promotion-eligible.
const PROMOTION_CONFIDENCE: f64 = 0.8;
/// Jaccard threshold for related same-session exchanges.
const RELATED_THRESHOLD: f64 = 0.6;
/// Jaccard threshold for long-term retrieval.
const LONG_TERM_THRESHOLD: f64 = 0.5;
/// Recent exchanges returned on retrieval.
const RECENT_COUNT: usize = 5;
/// Long-term entries returned on retrieval.
const LONG_TERM_COUNT: usize = 2;
/// Sessions idle longer than this are swept.
const MAX_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Topics whose presence makes an exchange promotion-eligible.
const PROMOTION_TOPICS: &[(&str, f64)] = &[
    ("architecture", 20.0),
    ("design", 20.0),
    ("pattern", 15.0),
    ("implementation", 15.0),
    ("error", 10.0),
    ("bug", 10.0),
];

/// One query/response exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    /// The user query.
    pub user_query: String,
    /// The final response.
    pub ai_response: String,
    /// Retrieval strategy used.
    pub strategy: String,
    /// Planner confidence.
    pub confidence: f64,
    /// Unix millis when recorded.
    pub timestamp: u64,
}

/// A promoted long-term memory.
#[derive(Debug, Clone, Serialize)]
pub struct LongTermMemory {
    /// The promoted exchange.
    pub exchange: Exchange,
    /// Importance used for eviction ordering, capped at 100.
    pub importance: f64,
    /// Session the exchange came from.
    pub session_id: String,
}

/// A session's live state.
#[derive(Debug)]
struct Session {
    user_id: String,
    start_time: u64,
    last_activity: u64,
    exchanges: VecDeque<Exchange>,
}

/// Memories returned for a query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedMemories {
    /// Last exchanges of the session, oldest first.
    pub recent: Vec<Exchange>,
    /// Same-session exchanges lexically related to the query.
    pub related: Vec<Exchange>,
    /// Long-term memories related to the query, by importance.
    pub long_term: Vec<LongTermMemory>,
}

/// Process-wide conversation memory.
#[derive(Debug, Default)]
pub struct ConversationMemoryService {
    sessions: DashMap<String, Session>,
    long_term: Mutex<Vec<LongTermMemory>>,
}

impl ConversationMemoryService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a session exists, stamping its start time.
    pub fn open_session(&self, session_id: &str, user_id: &str) {
        let now = now_millis();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                user_id: user_id.to_string(),
                start_time: now,
                last_activity: now,
                exchanges: VecDeque::new(),
            });
    }

    /// Appends an exchange to a session, promoting it to long-term
    /// storage when eligible.
    pub fn record_exchange(
        &self,
        session_id: &str,
        user_id: &str,
        user_query: &str,
        ai_response: &str,
        strategy: &str,
        confidence: f64,
    ) {
        let exchange = Exchange {
            user_query: user_query.to_string(),
            ai_response: ai_response.to_string(),
            strategy: strategy.to_string(),
            confidence,
            timestamp: now_millis(),
        };

        {
            let mut session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Session {
                    user_id: user_id.to_string(),
                    start_time: exchange.timestamp,
                    last_activity: exchange.timestamp,
                    exchanges: VecDeque::new(),
                });
            session.last_activity = exchange.timestamp;
            session.exchanges.push_back(exchange.clone());
            while session.exchanges.len() > MAX_EXCHANGES {
                session.exchanges.pop_front();
            }
        }

        if let Some(importance) = promotion_importance(user_query, confidence) {
            self.promote(session_id, exchange, importance);
        }
    }

    /// Retrieves recent, related, and long-term memories for a query.
    #[must_use]
    pub fn retrieve(&self, session_id: &str, query: &str) -> RetrievedMemories {
        let query_tokens = word_set(query);
        let mut memories = RetrievedMemories::default();

        if let Some(session) = self.sessions.get(session_id) {
            let total = session.exchanges.len();
            memories.recent = session
                .exchanges
                .iter()
                .skip(total.saturating_sub(RECENT_COUNT))
                .cloned()
                .collect();
            memories.related = session
                .exchanges
                .iter()
                .filter(|e| jaccard(&query_tokens, &word_set(&e.user_query)) > RELATED_THRESHOLD)
                .cloned()
                .collect();
        }

        if let Ok(store) = self.long_term.lock() {
            let mut related: Vec<LongTermMemory> = store
                .iter()
                .filter(|m| {
                    jaccard(&query_tokens, &word_set(&m.exchange.user_query))
                        > LONG_TERM_THRESHOLD
                })
                .cloned()
                .collect();
            related.sort_by(|a, b| {
                b.importance
                    .partial_cmp(&a.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            related.truncate(LONG_TERM_COUNT);
            memories.long_term = related;
        }

        memories
    }

    /// Evicts sessions idle for longer than 24 hours. Returns how many
    /// were removed.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(now_millis())
    }

    /// Sweep with an injected clock, for tests.
    pub fn sweep_idle_at(&self, now: u64) -> usize {
        let max_idle_millis = u64::try_from(MAX_IDLE.as_millis()).unwrap_or(u64::MAX);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.saturating_sub(session.last_activity) <= max_idle_millis);
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, "idle sessions swept");
        }
        removed
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Exchange count of one session.
    #[must_use]
    pub fn exchange_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |s| s.exchanges.len())
    }

    /// Number of long-term memories.
    #[must_use]
    pub fn long_term_count(&self) -> usize {
        self.long_term.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Owning user of a session, if known.
    #[must_use]
    pub fn session_user(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.user_id.clone())
    }

    /// Session start time, if known.
    #[must_use]
    pub fn session_start(&self, session_id: &str) -> Option<u64> {
        self.sessions.get(session_id).map(|s| s.start_time)
    }

    fn promote(&self, session_id: &str, exchange: Exchange, importance: f64) {
        let Ok(mut store) = self.long_term.lock() else {
            return;
        };
        store.push(LongTermMemory {
            exchange,
            importance,
            session_id: session_id.to_string(),
        });
        // Evict-by-importance after insert.
        while store.len() > MAX_LONG_TERM {
            let min_idx = store
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    a.1.importance
                        .partial_cmp(&b.1.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            match min_idx {
                Some(i) => {
                    store.remove(i);
                }
                None => break,
            }
        }
    }
}

/// Importance of a promotion-eligible exchange, or `None` when the
/// exchange does not qualify.
fn promotion_importance(query: &str, confidence: f64) -> Option<f64> {
    if confidence <= PROMOTION_CONFIDENCE {
        return None;
    }
    let lower = query.to_lowercase();
    let bonus: f64 = PROMOTION_TOPICS
        .iter()
        .filter(|(topic, _)| lower.contains(topic))
        .map(|(_, b)| b)
        .sum();
    if bonus == 0.0 {
        return None;
    }
    Some((confidence * 50.0 + bonus).min(100.0))
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
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

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(service: &ConversationMemoryService, session: &str, query: &str, confidence: f64) {
        service.record_exchange(session, "u1", query, "reply", "similarity_search", confidence);
    }

    #[test]
    fn test_session_exchanges_capped_at_twenty() {
        let service = ConversationMemoryService::new();
        for i in 0..30 {
            record(&service, "s1", &format!("query {i}"), 0.5);
        }
        assert_eq!(service.exchange_count("s1"), MAX_EXCHANGES);
        // Oldest dropped: recent retrieval ends with query 29.
        let memories = service.retrieve("s1", "anything");
        assert_eq!(
            memories.recent.last().map(|e| e.user_query.clone()),
            Some("query 29".to_string())
        );
    }

    #[test]
    fn test_recent_returns_last_five() {
        let service = ConversationMemoryService::new();
        for i in 0..8 {
            record(&service, "s1", &format!("query {i}"), 0.5);
        }
        let memories = service.retrieve("s1", "zzz");
        assert_eq!(memories.recent.len(), RECENT_COUNT);
        assert_eq!(memories.recent[0].user_query, "query 3");
    }

    #[test]
    fn test_related_by_lexical_similarity() {
        let service = ConversationMemoryService::new();
        record(&service, "s1", "how does the cache evict entries", 0.5);
        record(&service, "s1", "completely different topic", 0.5);
        let memories = service.retrieve("s1", "how does the cache evict entries quickly");
        assert_eq!(memories.related.len(), 1);
        assert!(memories.related[0].user_query.contains("cache"));
    }

    #[test]
    fn test_promotion_requires_confidence_and_topic() {
        let service = ConversationMemoryService::new();
        record(&service, "s1", "explain the architecture here", 0.9);
        record(&service, "s1", "explain the architecture here", 0.5); // low confidence
        record(&service, "s1", "what time is it", 0.9); // no topic
        assert_eq!(service.long_term_count(), 1);
    }

    #[test]
    fn test_long_term_capped_with_importance_eviction() {
        let service = ConversationMemoryService::new();
        // 101 promotions with increasing confidence; lowest importance
        // entry is evicted, never the newest high-importance one.
        for i in 0..=MAX_LONG_TERM {
            #[allow(clippy::cast_precision_loss)]
            let confidence = 0.81 + (i as f64) * 0.0015;
            record(&service, "s1", &format!("design review {i}"), confidence);
        }
        assert_eq!(service.long_term_count(), MAX_LONG_TERM);
    }

    #[test]
    fn test_long_term_retrieval_top_two_by_importance() {
        let service = ConversationMemoryService::new();
        record(&service, "s1", "cache design question", 0.85);
        record(&service, "s2", "cache design question", 0.95);
        record(&service, "s3", "cache design question", 0.90);
        let memories = service.retrieve("s1", "cache design question");
        assert_eq!(memories.long_term.len(), LONG_TERM_COUNT);
        assert!(memories.long_term[0].importance >= memories.long_term[1].importance);
    }

    #[test]
    fn test_importance_capped_at_100() {
        let importance = promotion_importance(
            "architecture design pattern implementation error bug",
            0.99,
        );
        assert_eq!(importance, Some(100.0));
    }

    #[test]
    fn test_idle_sweep() {
        let service = ConversationMemoryService::new();
        record(&service, "s1", "hello there", 0.5);
        let far_future = now_millis() + 25 * 60 * 60 * 1000;
        let removed = service.sweep_idle_at(far_future);
        assert_eq!(removed, 1);
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_fresh_sessions_survive_sweep() {
        let service = ConversationMemoryService::new();
        record(&service, "s1", "hello there", 0.5);
        assert_eq!(service.sweep_idle(), 0);
        assert_eq!(service.session_count(), 1);
    }

    #[test]
    fn test_unknown_session_retrieval_empty() {
        let service = ConversationMemoryService::new();
        let memories = service.retrieve("ghost", "anything");
        assert!(memories.recent.is_empty());
        assert!(memories.related.is_empty());
    }

    #[test]
    fn test_open_session_records_metadata() {
        let service = ConversationMemoryService::new();
        service.open_session("s1", "u9");
        assert_eq!(service.session_user("s1"), Some("u9".to_string()));
        assert!(service.session_start("s1").is_some());
    }
}
