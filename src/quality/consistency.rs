//! Consistency checking over merged chain output.
//!
//! Detects self-contradictions, dangling fragments, and unbalanced code
//! blocks in the final merged text. The Judge folds the resulting score
//! into its quality computation.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Window within which a yes/no pair counts as contradictory.
const CONTRADICTION_WINDOW: usize = 500;
/// Texts longer than this are expected to carry logical transitions.
const TRANSITION_MIN_LEN: usize = 500;
/// Score penalty per detected issue.
const ISSUE_PENALTY: f64 = 0.15;

/// Contradictory word pairs checked within the window.
const CONTRADICTION_PAIRS: &[(&str, &str)] = &[
    ("yes", "no"),
    ("always", "never"),
    ("must", "optional"),
];

/// Transition words expected in long explanatory text.
const TRANSITIONS: &[&str] = &[
    "therefore", "however", "because", "so", "thus", "first", "then", "finally",
];

static INCOMPLETE_OPENER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?i)\b(for example|such as|including),?\s*$").unwrap();
    re
});

static ORPHAN_DEICTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?im)^\s*(this|that)\s*[.!?]?\s*$").unwrap();
    re
});

/// Result of a consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    /// Consistency score in `[0, 1]`, 1 = no issues.
    pub score: f64,
    /// Human-readable issue descriptions.
    pub issues: Vec<String>,
}

impl ConsistencyReport {
    /// Returns `true` when no issues were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks the merged response text for internal consistency.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker {
    _private: (),
}

impl ConsistencyChecker {
    /// Creates a checker.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Runs every rule over the text.
    #[must_use]
    pub fn check(&self, text: &str) -> ConsistencyReport {
        let mut issues = Vec::new();
        let lower = text.to_lowercase();

        for (a, b) in CONTRADICTION_PAIRS {
            if let Some(distance) = pair_distance(&lower, a, b)
                && distance <= CONTRADICTION_WINDOW
            {
                issues.push(format!(
                    "contradictory \"{a}\"/\"{b}\" within {distance} chars"
                ));
            }
        }

        if INCOMPLETE_OPENER_RE.is_match(text.trim_end()) {
            issues.push("text ends on an incomplete opener fragment".to_string());
        }

        if ORPHAN_DEICTIC_RE.is_match(text) {
            issues.push("orphaned deictic reference (bare this/that)".to_string());
        }

        if text.len() > TRANSITION_MIN_LEN
            && !TRANSITIONS.iter().any(|t| lower.contains(t))
        {
            issues.push("long text with no logical transitions".to_string());
        }

        for block in code_blocks(text) {
            if let Some(symbol) = unbalanced_symbol(block) {
                issues.push(format!("code block has unbalanced '{symbol}'"));
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let score = (1.0 - issues.len() as f64 * ISSUE_PENALTY).max(0.0);
        ConsistencyReport { score, issues }
    }
}

/// Minimum distance in chars between occurrences of two words, if both
/// appear as standalone words.
fn pair_distance(lower: &str, a: &str, b: &str) -> Option<usize> {
    let positions = |word: &str| -> Vec<usize> {
        let mut out = Vec::new();
        let mut start = 0;
        while let Some(idx) = lower[start..].find(word) {
            let abs = start + idx;
            let before_ok = abs == 0
                || !lower[..abs]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_alphanumeric);
            let after = abs + word.len();
            let after_ok = after >= lower.len()
                || !lower[after..].chars().next().is_some_and(char::is_alphanumeric);
            if before_ok && after_ok {
                out.push(abs);
            }
            start = abs + word.len();
        }
        out
    };

    let pa = positions(a);
    let pb = positions(b);
    let mut best: Option<usize> = None;
    for x in &pa {
        for y in &pb {
            let d = x.abs_diff(*y);
            best = Some(best.map_or(d, |cur| cur.min(d)));
        }
    }
    best
}

/// Extracts fenced code blocks.
fn code_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(close) = after.find("```") else { break };
        blocks.push(&after[..close]);
        rest = &after[close + 3..];
    }
    blocks
}

/// Returns the first unbalanced bracket symbol in a block, if any.
fn unbalanced_symbol(block: &str) -> Option<char> {
    for (open, close) in [('{', '}'), ('(', ')'), ('[', ']')] {
        let opens = block.matches(open).count();
        let closes = block.matches(close).count();
        if opens != closes {
            return Some(open);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str) -> ConsistencyReport {
        ConsistencyChecker::new().check(text)
    }

    #[test]
    fn test_clean_text_scores_high() {
        let report = check("The cache evicts entries after one hour because memory is bounded.");
        assert!(report.is_clean());
        assert!((report.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_yes_no_contradiction_within_window() {
        let report = check("Yes, the cache is enabled. Actually no, it is disabled.");
        assert!(report.issues.iter().any(|i| i.contains("yes")));
        assert!(report.score < 1.0);
    }

    #[test]
    fn test_yes_no_far_apart_not_flagged() {
        let filler = "word ".repeat(200);
        let text = format!("yes {filler} no");
        let report = check(&text);
        assert!(!report.issues.iter().any(|i| i.contains("\"yes\"")));
    }

    #[test]
    fn test_always_never_flagged() {
        let report = check("It always retries. It never retries.");
        assert!(report.issues.iter().any(|i| i.contains("always")));
    }

    #[test]
    fn test_incomplete_opener_at_end() {
        let report = check("There are several strategies. For example,");
        assert!(report.issues.iter().any(|i| i.contains("incomplete opener")));
    }

    #[test]
    fn test_orphaned_deictic() {
        let report = check("The retry loop is bounded.\nThis.\nMore text follows.");
        assert!(report.issues.iter().any(|i| i.contains("deictic")));
    }

    #[test]
    fn test_long_text_without_transitions() {
        let text = "plain sentence with content words only ".repeat(20);
        let report = check(&text);
        assert!(report.issues.iter().any(|i| i.contains("transitions")));
    }

    #[test]
    fn test_long_text_with_transitions_clean() {
        let text = format!(
            "{} therefore the design holds.",
            "plain sentence with content words only ".repeat(20)
        );
        let report = check(&text);
        assert!(!report.issues.iter().any(|i| i.contains("transitions")));
    }

    #[test]
    fn test_unbalanced_code_block() {
        let report = check("Look:\n```\nvoid f() { if (x) { y(); }\n```\ndone");
        assert!(report.issues.iter().any(|i| i.contains("unbalanced")));
    }

    #[test]
    fn test_balanced_code_block_clean() {
        let report = check("Look:\n```\nvoid f() { y(); }\n```\ndone");
        assert!(!report.issues.iter().any(|i| i.contains("unbalanced")));
    }

    #[test]
    fn test_score_floor_is_zero() {
        // Stack many issues; score must clamp at 0.
        let text = "yes no always never must optional For example,";
        let report = check(text);
        assert!(report.score >= 0.0);
    }
}
