//! Predicate conjuncts as seen by the join enumerator.
//!
//! The enumerator never evaluates predicates. It only decides where a filter
//! can be placed: right after the first join step whose subgraph covers every
//! variable the conjunct references.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::query::graph::QueryGraph;
use crate::query::subgraph::Subgraph;

/// One WHERE-clause conjunct.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Predicate {
    /// Display form, used as the filter's identifier.
    pub expr: String,
    /// Variables the conjunct depends on.
    pub variables: BTreeSet<String>,
    /// Fraction of rows expected to pass, in `(0, 1]`.
    #[serde(default = "default_selectivity")]
    pub selectivity: f64,
}

fn default_selectivity() -> f64 {
    0.1
}

impl Predicate {
    /// Creates a conjunct over `variables` with the default selectivity.
    pub fn new<I, S>(expr: impl Into<String>, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expr: expr.into(),
            variables: variables.into_iter().map(Into::into).collect(),
            selectivity: default_selectivity(),
        }
    }

    /// Overrides the selectivity estimate, clamped to `(0, 1]`.
    pub fn with_selectivity(mut self, selectivity: f64) -> Self {
        self.selectivity = selectivity.clamp(f64::MIN_POSITIVE, 1.0);
        self
    }

    /// `true` if at least one variable of this conjunct is a node or
    /// relationship of `graph`. Other conjuncts would count as covered by
    /// every subgraph, including the empty one.
    pub fn is_anchored_in(&self, graph: &QueryGraph) -> bool {
        self.variables
            .iter()
            .any(|name| graph.contains_query_node(name) || graph.contains_query_rel(name))
    }

    /// `true` if `subgraph` binds every variable of this conjunct.
    pub fn is_covered_by(&self, subgraph: &Subgraph<'_>) -> bool {
        subgraph.contains_all_variables(self.variables.iter().map(String::as_str))
    }
}

/// Conjuncts covered by `next` but by none of `prev`.
///
/// These are exactly the filters to place on top of the step that produced
/// `next` from the `prev` inputs.
pub fn newly_matched<'p>(
    predicates: &'p [Predicate],
    next: &Subgraph<'_>,
    prev: &[Subgraph<'_>],
) -> Vec<&'p Predicate> {
    predicates
        .iter()
        .filter(|p| p.is_covered_by(next))
        .filter(|p| !prev.iter().any(|input| p.is_covered_by(input)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::graph::{QueryNode, QueryRel};

    #[test]
    fn newly_matched_skips_predicates_already_covered() {
        let mut graph = QueryGraph::new();
        for name in ["a", "b"] {
            graph.add_query_node(QueryNode::new(name)).expect("node");
        }
        graph
            .add_query_rel(QueryRel::new("r", "a", "b"))
            .expect("rel");
        let predicates = vec![
            Predicate::new("a.age > 30", ["a"]),
            Predicate::new("a.id = b.id", ["a", "b"]),
        ];
        let only_a = Subgraph::new(&graph).with_node(0);
        let both = Subgraph::new(&graph).with_rel(0);
        let placed = newly_matched(&predicates, &both, &[only_a]);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].expr, "a.id = b.id");
        let from_scratch = newly_matched(&predicates, &only_a, &[]);
        assert_eq!(from_scratch.len(), 1);
        assert_eq!(from_scratch[0].expr, "a.age > 30");
    }

    #[test]
    fn anchoring_needs_one_bound_variable() {
        let mut graph = QueryGraph::new();
        graph.add_query_node(QueryNode::new("a")).expect("node");
        assert!(Predicate::new("a.x = outer.x", ["a", "outer"]).is_anchored_in(&graph));
        assert!(!Predicate::new("outer.x = 1", ["outer"]).is_anchored_in(&graph));
        assert!(!Predicate::new("true", Vec::<String>::new()).is_anchored_in(&graph));
    }
}
