//! Cardinality statistics consulted while costing join candidates.
//!
//! The enumerator only needs coarse counts: how many nodes carry a label set
//! and how many relationships of a type exist. Anything unknown falls back to
//! configurable defaults so planning never fails for lack of statistics.

use std::collections::HashMap;

use serde::Deserialize;

use crate::query::graph::{QueryNode, QueryRel};

/// Provides table cardinalities to the cost model.
pub trait StatisticsProvider: Send + Sync {
    /// Estimated number of nodes carrying every label in `labels`.
    fn node_count(&self, labels: &[String]) -> f64;

    /// Estimated number of relationships of any type in `labels`.
    fn rel_count(&self, labels: &[String]) -> f64;

    /// Average number of `rel` neighbours per `from` node.
    fn extension_rate(&self, rel: &QueryRel, from: &QueryNode) -> f64 {
        let nodes = self.node_count(&from.labels).max(1.0);
        self.rel_count(&rel.labels) / nodes
    }
}

/// Simple in-memory statistics used for tests, the CLI and prototyping.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InMemoryStatistics {
    /// Node counts keyed by label.
    pub nodes: HashMap<String, f64>,
    /// Relationship counts keyed by type.
    pub rels: HashMap<String, f64>,
    /// Count used for unlabeled or unknown node variables.
    pub default_node_count: f64,
    /// Count used for untyped or unknown relationship variables.
    pub default_rel_count: f64,
}

impl Default for InMemoryStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStatistics {
    /// Creates statistics with 1,000 nodes and 10,000 relationships per unknown table.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            rels: HashMap::new(),
            default_node_count: 1_000.0,
            default_rel_count: 10_000.0,
        }
    }

    /// Registers the node count for a label.
    pub fn with_node_count(mut self, label: impl Into<String>, count: f64) -> Self {
        self.nodes.insert(label.into(), count);
        self
    }

    /// Registers the relationship count for a type.
    pub fn with_rel_count(mut self, label: impl Into<String>, count: f64) -> Self {
        self.rels.insert(label.into(), count);
        self
    }

    /// Overrides the fallback node count.
    pub fn with_default_node_count(mut self, count: f64) -> Self {
        self.default_node_count = count;
        self
    }

    /// Overrides the fallback relationship count.
    pub fn with_default_rel_count(mut self, count: f64) -> Self {
        self.default_rel_count = count;
        self
    }
}

impl StatisticsProvider for InMemoryStatistics {
    fn node_count(&self, labels: &[String]) -> f64 {
        // A node must carry all labels, so the rarest label bounds the count.
        labels
            .iter()
            .filter_map(|label| self.nodes.get(label).copied())
            .reduce(f64::min)
            .unwrap_or(self.default_node_count)
    }

    fn rel_count(&self, labels: &[String]) -> f64 {
        if labels.is_empty() {
            return self.default_rel_count;
        }
        labels
            .iter()
            .map(|label| self.rels.get(label).copied().unwrap_or(self.default_rel_count))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_uses_rarest_label() {
        let stats = InMemoryStatistics::new()
            .with_node_count("Person", 500.0)
            .with_node_count("Admin", 5.0);
        assert_eq!(stats.node_count(&["Person".into(), "Admin".into()]), 5.0);
        assert_eq!(stats.node_count(&[]), 1_000.0);
    }

    #[test]
    fn extension_rate_divides_rels_by_source_nodes() {
        let stats = InMemoryStatistics::new()
            .with_node_count("Person", 100.0)
            .with_rel_count("KNOWS", 400.0);
        let from = QueryNode::new("a").with_label("Person");
        let rel = QueryRel::new("r", "a", "b").with_label("KNOWS");
        assert_eq!(stats.extension_rate(&rel, &from), 4.0);
    }
}
