//! Memo of candidate plans per subgraph, organised by DP level.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;

use crate::query::logical::LogicalPlan;
use crate::query::subgraph::Subgraph;

/// Dynamic-programming table mapping a [`Subgraph`] to its candidate plans.
///
/// Level `k` holds subgraphs with exactly `k` relationships. Lookups of a
/// subgraph without plans yield an empty slice rather than an error.
#[derive(Debug, Default)]
pub struct SubplanTable<'g> {
    levels: Vec<FxHashMap<Subgraph<'g>, Vec<LogicalPlan>>>,
}

impl<'g> SubplanTable<'g> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Ensures levels `0..=max_level` exist. Existing levels are kept.
    pub fn resize(&mut self, max_level: usize) {
        if self.levels.len() <= max_level {
            self.levels.resize_with(max_level + 1, FxHashMap::default);
        }
    }

    /// Highest level the table has room for, or `None` when empty.
    pub fn max_level(&self) -> Option<usize> {
        self.levels.len().checked_sub(1)
    }

    /// `true` if at least one plan is recorded for `subgraph`.
    pub fn contains_plans(&self, subgraph: &Subgraph<'g>) -> bool {
        !self.plans(subgraph).is_empty()
    }

    /// Plans recorded for `subgraph`, empty if none.
    pub fn plans(&self, subgraph: &Subgraph<'g>) -> &[LogicalPlan] {
        self.levels
            .get(subgraph.level())
            .and_then(|level| level.get(subgraph))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Appends `plan` to the candidates of `subgraph`, growing the table if
    /// the subgraph's level was not pre-allocated.
    pub fn add_plan(&mut self, subgraph: Subgraph<'g>, plan: LogicalPlan) {
        let level = subgraph.level();
        self.resize(level);
        self.levels[level].entry(subgraph).or_default().push(plan);
    }

    /// Removes and returns the plans of `subgraph`.
    pub fn take_plans(&mut self, subgraph: &Subgraph<'g>) -> Vec<LogicalPlan> {
        self.levels
            .get_mut(subgraph.level())
            .and_then(|level| level.remove(subgraph))
            .unwrap_or_default()
    }

    /// Subgraphs recorded at `level`, sorted for deterministic iteration.
    pub fn subgraphs_at(&self, level: usize) -> Vec<Subgraph<'g>> {
        let mut keys: Vec<Subgraph<'g>> = self
            .levels
            .get(level)
            .map(|plans| plans.keys().copied().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Sorts every candidate list at `level` with `cmp` and keeps the best `limit`.
    pub fn sort_and_truncate<F>(&mut self, level: usize, limit: usize, mut cmp: F)
    where
        F: FnMut(&LogicalPlan, &LogicalPlan) -> Ordering,
    {
        let Some(plans) = self.levels.get_mut(level) else {
            return;
        };
        for candidates in plans.values_mut() {
            candidates.sort_by(&mut cmp);
            candidates.truncate(limit.max(1));
        }
    }

    /// Drops every level below `level`; later levels keep their positions.
    pub fn clear_levels_below(&mut self, level: usize) {
        for plans in self.levels.iter_mut().take(level) {
            plans.clear();
        }
    }

    /// Drops all plans and levels.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Number of subgraphs with recorded plans across all levels.
    pub fn num_subgraphs(&self) -> usize {
        self.levels.iter().map(FxHashMap::len).sum()
    }

    /// Number of plans across all levels.
    pub fn num_plans(&self) -> usize {
        self.levels
            .iter()
            .flat_map(FxHashMap::values)
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Var;
    use crate::query::graph::{QueryGraph, QueryNode, QueryRel};
    use crate::query::logical::{LogicalOp, PlanNode};

    fn graph() -> QueryGraph {
        let mut graph = QueryGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_query_node(QueryNode::new(name)).expect("node");
        }
        graph.add_query_rel(QueryRel::new("r1", "a", "b")).expect("r1");
        graph
    }

    fn plan(cost: f64) -> LogicalPlan {
        LogicalPlan::new(
            PlanNode::new(LogicalOp::ScanNode {
                var: Var::from("a"),
                labels: Vec::new(),
            }),
            1.0,
            cost,
        )
    }

    #[test]
    fn missing_subgraph_yields_empty_slice() {
        let graph = graph();
        let table = SubplanTable::new();
        let subgraph = Subgraph::new(&graph).with_rel(0);
        assert!(!table.contains_plans(&subgraph));
        assert!(table.plans(&subgraph).is_empty());
    }

    #[test]
    fn node_only_difference_is_a_distinct_key() {
        let graph = graph();
        let mut table = SubplanTable::new();
        table.resize(1);
        let base = Subgraph::new(&graph).with_rel(0);
        let wider = base.with_node(2);
        table.add_plan(base, plan(1.0));
        table.add_plan(wider, plan(2.0));
        table.add_plan(wider, plan(3.0));
        assert_eq!(table.plans(&base).len(), 1);
        assert_eq!(table.plans(&wider).len(), 2);
        assert_eq!(table.subgraphs_at(1), vec![base, wider]);
    }

    #[test]
    fn clear_levels_below_keeps_higher_levels() {
        let graph = graph();
        let mut table = SubplanTable::new();
        let scan = Subgraph::new(&graph).with_node(0);
        let rel = Subgraph::new(&graph).with_rel(0);
        table.add_plan(scan, plan(1.0));
        table.add_plan(rel, plan(1.0));
        table.clear_levels_below(1);
        assert!(!table.contains_plans(&scan));
        assert!(table.contains_plans(&rel));
        assert_eq!(table.max_level(), Some(1));
        table.clear();
        assert_eq!(table.num_plans(), 0);
        assert_eq!(table.max_level(), None);
    }

    #[test]
    fn sort_and_truncate_keeps_best() {
        let graph = graph();
        let mut table = SubplanTable::new();
        let rel = Subgraph::new(&graph).with_rel(0);
        for cost in [5.0, 1.0, 3.0] {
            table.add_plan(rel, plan(cost));
        }
        table.sort_and_truncate(1, 2, |a, b| a.cost.total_cmp(&b.cost));
        let costs: Vec<f64> = table.plans(&rel).iter().map(|p| p.cost).collect();
        assert_eq!(costs, vec![1.0, 3.0]);
    }
}
