//! Incremental similarity graph over indexed chunks.
//!
//! Nodes are chunks; an undirected edge exists iff the Jaccard similarity
//! of their whitespace-split, lowercased token sets exceeds 0.5. Each node
//! carries a content hash so recomputation touches only changed nodes:
//! unchanged nodes keep their cached edges.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::index::hash::md5_hex;

/// Minimum Jaccard similarity for an edge.
pub const EDGE_THRESHOLD: f64 = 0.5;

/// A node in the similarity graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Stable node id.
    pub id: String,
    /// Node content (chunk text).
    pub content: String,
    /// Node type (chunk type).
    pub node_type: String,
}

/// An undirected weighted edge. Identity is the unordered `(src, dst)`
/// pair; constructors normalize so `src <= dst`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    /// Lexicographically smaller endpoint.
    pub src: String,
    /// Lexicographically larger endpoint.
    pub dst: String,
    /// Jaccard similarity in `(0, 1]`.
    pub weight: f64,
}

impl GraphEdge {
    /// Creates a normalized edge.
    #[must_use]
    pub fn new(a: &str, b: &str, weight: f64) -> Self {
        if a <= b {
            Self {
                src: a.to_string(),
                dst: b.to_string(),
                weight,
            }
        } else {
            Self {
                src: b.to_string(),
                dst: a.to_string(),
                weight,
            }
        }
    }

    /// Returns `true` when this edge touches `id`.
    #[must_use]
    pub fn touches(&self, id: &str) -> bool {
        self.src == id || self.dst == id
    }
}

/// Jaccard similarity of two token sets.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
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

fn tokenize(content: &str) -> HashSet<String> {
    content
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Incremental similarity graph calculator.
///
/// The indexing pipeline is the sole writer. Changed nodes are detected
/// by content hash; only their edges are recomputed.
#[derive(Debug, Default)]
pub struct SimilarityGraph {
    nodes: BTreeMap<String, GraphNode>,
    content_hashes: BTreeMap<String, String>,
    edges: Vec<GraphEdge>,
}

impl SimilarityGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch of upserted nodes, recomputing edges only for
    /// nodes whose content hash changed. Returns how many nodes were
    /// actually recomputed.
    pub fn update(&mut self, nodes: Vec<GraphNode>) -> usize {
        let mut dirty: Vec<String> = Vec::new();
        for node in nodes {
            let digest = md5_hex(node.content.as_bytes());
            let unchanged = self
                .content_hashes
                .get(&node.id)
                .is_some_and(|h| *h == digest);
            if unchanged {
                continue;
            }
            self.content_hashes.insert(node.id.clone(), digest);
            dirty.push(node.id.clone());
            self.nodes.insert(node.id.clone(), node);
        }

        if dirty.is_empty() {
            return 0;
        }

        let dirty_set: BTreeSet<&String> = dirty.iter().collect();
        // Drop every edge touching a dirty node, then recompute those
        // nodes against the full current node set.
        self.edges
            .retain(|e| !dirty_set.contains(&e.src) && !dirty_set.contains(&e.dst));

        let token_sets: BTreeMap<&String, HashSet<String>> = self
            .nodes
            .iter()
            .map(|(id, node)| (id, tokenize(&node.content)))
            .collect();

        for id in &dirty {
            let Some(my_tokens) = token_sets.get(id) else {
                continue;
            };
            for (other_id, other_tokens) in &token_sets {
                if *other_id == id {
                    continue;
                }
                // Dirty pairs are computed once, from the smaller id.
                if dirty_set.contains(other_id) && *other_id < id {
                    continue;
                }
                let weight = jaccard(my_tokens, other_tokens);
                if weight > EDGE_THRESHOLD {
                    self.edges.push(GraphEdge::new(id, other_id, weight));
                }
            }
        }

        debug!(recomputed = dirty.len(), edges = self.edges.len(), "similarity graph updated");
        dirty.len()
    }

    /// Removes a node and its edges.
    pub fn remove(&mut self, id: &str) {
        self.nodes.remove(id);
        self.content_hashes.remove(id);
        self.edges.retain(|e| !e.touches(id));
    }

    /// Edges touching the given node.
    #[must_use]
    pub fn neighbors(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|e| e.touches(id)).collect()
    }

    /// Total node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, content: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            content: content.to_string(),
            node_type: "method_implementation".to_string(),
        }
    }

    #[test]
    fn test_edges_form_above_threshold() {
        let mut graph = SimilarityGraph::new();
        graph.update(vec![
            node("a", "load cache entry from disk"),
            node("b", "load cache entry from memory"),
            node("c", "completely unrelated words here"),
        ]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.neighbors("a").len(), 1);
        assert!(graph.neighbors("c").is_empty());
    }

    #[test]
    fn test_unchanged_nodes_not_recomputed() {
        let mut graph = SimilarityGraph::new();
        graph.update(vec![node("a", "same text"), node("b", "same text")]);
        let recomputed = graph.update(vec![node("a", "same text"), node("b", "same text")]);
        assert_eq!(recomputed, 0);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_changed_node_recomputes_edges() {
        let mut graph = SimilarityGraph::new();
        graph.update(vec![
            node("a", "shared words in both"),
            node("b", "shared words in both"),
        ]);
        assert_eq!(graph.edge_count(), 1);

        let recomputed = graph.update(vec![node("a", "totally different now entirely")]);
        assert_eq!(recomputed, 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_identity_is_unordered() {
        let e1 = GraphEdge::new("x", "y", 0.8);
        let e2 = GraphEdge::new("y", "x", 0.8);
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_remove_drops_edges() {
        let mut graph = SimilarityGraph::new();
        graph.update(vec![
            node("a", "common tokens everywhere"),
            node("b", "common tokens everywhere"),
        ]);
        graph.remove("a");
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_no_duplicate_edges_between_dirty_pair() {
        let mut graph = SimilarityGraph::new();
        graph.update(vec![
            node("a", "identical content tokens"),
            node("b", "identical content tokens"),
        ]);
        // Both dirty in one batch: exactly one edge.
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = tokenize("one two three");
        let b = tokenize("one two three");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        let c = tokenize("four five");
        assert!((jaccard(&a, &c)).abs() < f64::EPSILON);
    }
}
