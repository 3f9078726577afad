//! Hallucination detection over stage and merged output.
//!
//! Two adjustable inputs: a set of known-fact sentences and a set of
//! suspicious overconfidence phrases. Rules emit issues tagged LOW,
//! MEDIUM, or HIGH; the score is `min(1, 0.5·HIGH + 0.2·MEDIUM +
//! 0.05·LOW)` and a response is trusted iff the score stays below 0.3
//! with no HIGH issue.

use std::collections::HashSet;

use serde::Serialize;

/// Score below which (with no HIGH issue) a response is trusted.
const TRUST_THRESHOLD: f64 = 0.3;
/// Jaccard overlap above which a sentence is "about" a known fact.
const FACT_OVERLAP: f64 = 0.5;

/// Default suspicious phrases (MEDIUM severity).
const DEFAULT_SUSPICIOUS: &[&str] = &[
    "definitely",
    "guaranteed",
    "everyone knows",
    "always works",
    "never fails",
    "100% certain",
];

/// Default mild overconfidence phrases (LOW severity).
const DEFAULT_MILD: &[&str] = &["obviously", "clearly", "of course", "without a doubt"];

/// Negation markers used for known-fact contradiction detection.
const NEGATIONS: &[&str] = &["not", "never", "no", "cannot", "isn't", "doesn't", "won't"];

/// Issue severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Directly contradicts a known fact.
    High,
    /// Overconfident, unverifiable claim.
    Medium,
    /// Mildly overconfident phrasing.
    Low,
}

/// A single detected issue.
#[derive(Debug, Clone, Serialize)]
pub struct HallucinationIssue {
    /// Severity tag.
    pub severity: Severity,
    /// Description of the finding.
    pub message: String,
}

/// Result of a hallucination check.
#[derive(Debug, Clone, Serialize)]
pub struct HallucinationReport {
    /// Score in `[0, 1]`; higher = more suspect.
    pub score: f64,
    /// Whether the response is trusted.
    pub trusted: bool,
    /// Detected issues, most severe first.
    pub issues: Vec<HallucinationIssue>,
}

/// Detects overconfident and fact-contradicting output.
#[derive(Debug, Clone)]
pub struct HallucinationDetector {
    known_facts: Vec<String>,
    suspicious: Vec<String>,
    mild: Vec<String>,
}

impl Default for HallucinationDetector {
    fn default() -> Self {
        Self {
            known_facts: Vec::new(),
            suspicious: DEFAULT_SUSPICIOUS.iter().map(|s| (*s).to_string()).collect(),
            mild: DEFAULT_MILD.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl HallucinationDetector {
    /// Creates a detector with the default phrase sets and no facts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a known-fact sentence.
    pub fn add_fact(&mut self, fact: impl Into<String>) {
        self.known_facts.push(fact.into());
    }

    /// Adds a suspicious (MEDIUM) phrase.
    pub fn add_suspicious_phrase(&mut self, phrase: impl Into<String>) {
        self.suspicious.push(phrase.into().to_lowercase());
    }

    /// Runs every rule over the text.
    #[must_use]
    pub fn check(&self, text: &str) -> HallucinationReport {
        let mut issues = Vec::new();
        let lower = text.to_lowercase();

        for phrase in &self.suspicious {
            if lower.contains(phrase.as_str()) {
                issues.push(HallucinationIssue {
                    severity: Severity::Medium,
                    message: format!("overconfident phrase \"{phrase}\""),
                });
            }
        }

        for phrase in &self.mild {
            if lower.contains(phrase.as_str()) {
                issues.push(HallucinationIssue {
                    severity: Severity::Low,
                    message: format!("hedging overconfidence \"{phrase}\""),
                });
            }
        }

        for fact in &self.known_facts {
            if let Some(sentence) = contradicting_sentence(&lower, fact) {
                issues.push(HallucinationIssue {
                    severity: Severity::High,
                    message: format!("contradicts known fact \"{fact}\": \"{sentence}\""),
                });
            }
        }

        issues.sort_by_key(|i| i.severity);

        let highs = issues.iter().filter(|i| i.severity == Severity::High).count();
        let mediums = issues
            .iter()
            .filter(|i| i.severity == Severity::Medium)
            .count();
        let lows = issues.iter().filter(|i| i.severity == Severity::Low).count();

        #[allow(clippy::cast_precision_loss)]
        let score =
            (0.5 * highs as f64 + 0.2 * mediums as f64 + 0.05 * lows as f64).min(1.0);
        let trusted = score < TRUST_THRESHOLD && highs == 0;

        HallucinationReport {
            score,
            trusted,
            issues,
        }
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Finds a sentence that overlaps a known fact while adding a negation
/// the fact itself does not carry.
fn contradicting_sentence(lower_text: &str, fact: &str) -> Option<String> {
    let fact_words = word_set(fact);
    if fact_words.is_empty() {
        return None;
    }
    let fact_negated = NEGATIONS.iter().any(|n| fact_words.contains(*n));

    for sentence in lower_text.split(['.', '!', '?', '\n']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let words = word_set(sentence);
        let content: HashSet<&String> = fact_words
            .iter()
            .filter(|w| !NEGATIONS.contains(&w.as_str()))
            .collect();
        if content.is_empty() {
            continue;
        }
        let hit = content.iter().filter(|w| words.contains(**w)).count();
        #[allow(clippy::cast_precision_loss)]
        let overlap = hit as f64 / content.len() as f64;
        let sentence_negated = NEGATIONS.iter().any(|n| words.contains(*n));
        if overlap > FACT_OVERLAP && sentence_negated != fact_negated {
            return Some(sentence.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_trusted() {
        let report = HallucinationDetector::new().check("The cache evicts after one hour.");
        assert!(report.trusted);
        assert!(report.score.abs() < f64::EPSILON);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_empty_text_is_trusted() {
        let report = HallucinationDetector::new().check("");
        assert!(report.trusted);
    }

    #[test]
    fn test_suspicious_phrases_are_medium() {
        let report =
            HallucinationDetector::new().check("This is definitely the guaranteed answer.");
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.severity == Severity::Medium));
        assert!((report.score - 0.4).abs() < 1e-9);
        // No HIGH and score above threshold: not trusted.
        assert!(!report.trusted);
    }

    #[test]
    fn test_mild_phrases_are_low() {
        let report = HallucinationDetector::new().check("Obviously this holds.");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Low);
        assert!(report.trusted);
    }

    #[test]
    fn test_fact_negation_is_high() {
        let mut detector = HallucinationDetector::new();
        detector.add_fact("the cache is bounded");
        let report = detector.check("The cache is not bounded at all.");
        assert!(report.issues.iter().any(|i| i.severity == Severity::High));
        assert!(!report.trusted);
        assert!(report.score >= 0.5);
    }

    #[test]
    fn test_fact_restated_is_not_flagged() {
        let mut detector = HallucinationDetector::new();
        detector.add_fact("the cache is bounded");
        let report = detector.check("The cache is bounded by configuration.");
        assert!(report.issues.is_empty());
        assert!(report.trusted);
    }

    #[test]
    fn test_scenario_trip() {
        // "definitely" + "everyone knows" + negated known fact.
        let mut detector = HallucinationDetector::new();
        detector.add_fact("retries are bounded");
        let report = detector
            .check("Everyone knows retries are not bounded, and this is definitely final.");
        assert!(report.score >= 0.5);
        assert!(report.issues.iter().any(|i| i.severity == Severity::High));
        assert!(!report.trusted);
    }

    #[test]
    fn test_score_clamped_at_one() {
        let mut detector = HallucinationDetector::new();
        for i in 0..5 {
            detector.add_fact(format!("fact number {i} holds"));
        }
        let report = detector.check(
            "fact number 0 never holds. fact number 1 never holds. fact number 2 never holds. \
             fact number 3 never holds. fact number 4 never holds.",
        );
        assert!(report.score <= 1.0);
    }

    #[test]
    fn test_issues_sorted_most_severe_first() {
        let mut detector = HallucinationDetector::new();
        detector.add_fact("the index is incremental");
        let report =
            detector.check("Obviously the index is not incremental, definitely.");
        assert_eq!(report.issues.first().map(|i| i.severity), Some(Severity::High));
    }
}
