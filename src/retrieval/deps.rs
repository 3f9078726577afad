//! File-to-file dependency graph.
//!
//! Two passes over the sorted source tree. Pass 1 maps every method name
//! to the files defining it. Pass 2 extracts, per file, (a) imports whose
//! fully qualified name starts with the project root namespace, mapped to
//! `SimpleName.java`, and (b) method-call expression names resolved
//! through the pass-1 map. The union is `forward[file]`; `reverse` is the
//! transpose. Construction is one-shot at indexing time; files may
//! mutually depend, so expansion always walks with a visited set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::index::chunker;

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"\b([a-z]\w*)\s*\(").unwrap();
    re
});

/// Java-ish keywords that look like calls in source text.
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "super", "this", "synchronized",
];

/// Forward and reverse import/call dependencies between source files.
///
/// Invariant: `f ∈ forward[g] ⇔ g ∈ reverse[f]`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph from `(filename, content)` pairs.
    ///
    /// Files that fail to parse contribute no method definitions but are
    /// still scanned for imports and calls. Input order does not matter;
    /// passes iterate in sorted-filename order.
    #[must_use]
    pub fn build(files: &[(String, String)], project_namespace: &str) -> Self {
        let mut sorted: Vec<&(String, String)> = files.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        // Pass 1: method name → defining files.
        let mut method_owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut parsed_files: BTreeMap<&str, chunker::ParsedFile> = BTreeMap::new();
        for (filename, content) in &sorted {
            match chunker::parse_source(filename, content) {
                Ok(parsed) => {
                    for method in parsed.method_names() {
                        method_owners
                            .entry(method.to_string())
                            .or_default()
                            .insert(filename.clone());
                    }
                    parsed_files.insert(filename.as_str(), parsed);
                }
                Err(e) => {
                    debug!(file = %filename, error = %e, "dependency pass skipping unparsable file");
                }
            }
        }

        // Pass 2: imports under the project namespace + resolved calls.
        let prefix = format!("{project_namespace}.");
        let mut forward: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (filename, content) in &sorted {
            let mut deps: BTreeSet<String> = BTreeSet::new();

            if let Some(parsed) = parsed_files.get(filename.as_str()) {
                for import in &parsed.imports {
                    if let Some(rest) = import.strip_prefix(&prefix) {
                        let simple = rest.rsplit('.').next().unwrap_or(rest);
                        deps.insert(format!("{simple}.java"));
                    }
                }
            }

            for cap in CALL_RE.captures_iter(content) {
                let Some(name) = cap.get(1) else { continue };
                if CALL_KEYWORDS.contains(&name.as_str()) {
                    continue;
                }
                if let Some(owners) = method_owners.get(name.as_str()) {
                    deps.extend(owners.iter().cloned());
                }
            }

            deps.remove(filename.as_str());
            forward.insert(filename.clone(), deps);
        }

        // Reverse is the transpose.
        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (file, deps) in &forward {
            reverse.entry(file.clone()).or_default();
            for dep in deps {
                reverse.entry(dep.clone()).or_default().insert(file.clone());
            }
        }

        Self { forward, reverse }
    }

    /// Forward dependencies of a file.
    #[must_use]
    pub fn forward(&self, file: &str) -> &BTreeSet<String> {
        static EMPTY: LazyLock<BTreeSet<String>> = LazyLock::new(BTreeSet::new);
        self.forward.get(file).unwrap_or(&EMPTY)
    }

    /// Reverse dependencies of a file (its dependents).
    #[must_use]
    pub fn reverse(&self, file: &str) -> &BTreeSet<String> {
        static EMPTY: LazyLock<BTreeSet<String>> = LazyLock::new(BTreeSet::new);
        self.reverse.get(file).unwrap_or(&EMPTY)
    }

    /// Files known to the graph.
    #[must_use]
    pub fn files(&self) -> impl Iterator<Item = &String> {
        self.forward.keys()
    }

    /// Number of files in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns `true` when the graph has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Total forward edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<(String, String)> {
        vec![
            (
                "Cache.java".to_string(),
                r"package com.example;
import com.example.util.Clock;

public class Cache {
    private Clock clock;

    public String lookupEntry(String key) {
        return clock.now() + key + key.length();
    }
}
"
                .to_string(),
            ),
            (
                "Clock.java".to_string(),
                r"package com.example.util;

public class Clock {
    public String now() {
        return String.valueOf(System.currentTimeMillis());
    }
}
"
                .to_string(),
            ),
            (
                "Handler.java".to_string(),
                r"package com.example;

public class Handler {
    public void handle(String key) {
        String value = lookupEntry(key);
        System.out.println(value + key);
    }
}
"
                .to_string(),
            ),
        ]
    }

    #[test]
    fn test_import_edges_under_namespace() {
        let graph = DependencyGraph::build(&files(), "com.example");
        assert!(graph.forward("Cache.java").contains("Clock.java"));
    }

    #[test]
    fn test_call_edges_resolved_via_method_map() {
        let graph = DependencyGraph::build(&files(), "com.example");
        // Handler calls lookupEntry, defined in Cache.java.
        assert!(graph.forward("Handler.java").contains("Cache.java"));
    }

    #[test]
    fn test_reverse_is_transpose() {
        let graph = DependencyGraph::build(&files(), "com.example");
        for file in graph.files() {
            for dep in graph.forward(file) {
                assert!(
                    graph.reverse(dep).contains(file),
                    "{file} -> {dep} missing from reverse"
                );
            }
        }
        for (file, dependents) in &graph.reverse {
            for dependent in dependents {
                assert!(
                    graph.forward(dependent).contains(file),
                    "reverse {file} <- {dependent} missing from forward"
                );
            }
        }
    }

    #[test]
    fn test_no_self_edges() {
        let graph = DependencyGraph::build(&files(), "com.example");
        for file in graph.files() {
            assert!(!graph.forward(file).contains(file));
        }
    }

    #[test]
    fn test_foreign_namespace_imports_ignored() {
        let input = vec![(
            "A.java".to_string(),
            r"package com.example;
import java.util.Map;
import org.other.Thing;

public class A {
    private Map<String, String> m;

    public void run(String input) {
        m.put(input, input.trim());
    }
}
"
            .to_string(),
        )];
        let graph = DependencyGraph::build(&input, "com.example");
        assert!(graph.forward("A.java").is_empty());
    }

    #[test]
    fn test_empty_input() {
        let graph = DependencyGraph::build(&[], "com.example");
        assert!(graph.is_empty());
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.forward("Missing.java").is_empty());
    }

    #[test]
    fn test_mutual_dependency_allowed() {
        let input = vec![
            (
                "A.java".to_string(),
                r"package com.example;
import com.example.B;
public class A {
    public void runAlpha(String x) { helperBeta(x.trim().toLowerCase()); }
}
"
                .to_string(),
            ),
            (
                "B.java".to_string(),
                r"package com.example;
import com.example.A;
public class B {
    public void helperBeta(String x) { runAlpha(x.trim().toUpperCase()); }
}
"
                .to_string(),
            ),
        ];
        let graph = DependencyGraph::build(&input, "com.example");
        assert!(graph.forward("A.java").contains("B.java"));
        assert!(graph.forward("B.java").contains("A.java"));
    }
}
