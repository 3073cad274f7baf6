//! Bitset selectors over a [`QueryGraph`].
//!
//! A [`Subgraph`] names a subset of the query graph's nodes and
//! relationships with one 64-bit word per kind. Relationship membership
//! always implies membership of both endpoints.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::query::graph::QueryGraph;

/// Maximum number of node variables, and separately of relationship
/// variables, a query graph may declare.
pub const MAX_QUERY_VARIABLES: usize = u64::BITS as usize;

/// Cheap, copyable membership mask over a query graph.
///
/// Equality compares both bitsets. The [`Hash`] implementation only looks at
/// the relationship bitset (falling back to the node bitset when no
/// relationship is selected), so subgraphs that differ only in their nodes
/// share a bucket and are told apart by equality.
#[derive(Clone, Copy)]
pub struct Subgraph<'g> {
    graph: &'g QueryGraph,
    nodes: u64,
    rels: u64,
}

impl<'g> Subgraph<'g> {
    /// Empty selector over `graph`.
    pub fn new(graph: &'g QueryGraph) -> Self {
        Self {
            graph,
            nodes: 0,
            rels: 0,
        }
    }

    /// Selector covering every node and relationship currently in `graph`.
    pub fn full(graph: &'g QueryGraph) -> Self {
        Self {
            graph,
            nodes: low_bits(graph.num_nodes()),
            rels: low_bits(graph.num_rels()),
        }
    }

    /// Rebuilds a selector from raw bitsets.
    ///
    /// Relationship endpoints are added so the result is always closed.
    pub fn from_bits(graph: &'g QueryGraph, nodes: u64, rels: u64) -> Self {
        let mut subgraph = Self {
            graph,
            nodes,
            rels: 0,
        };
        for pos in BitIter(rels) {
            subgraph.add_rel(pos);
        }
        subgraph
    }

    /// The graph this selector indexes into.
    pub fn graph(&self) -> &'g QueryGraph {
        self.graph
    }

    /// Raw node bitset.
    pub fn node_bits(&self) -> u64 {
        self.nodes
    }

    /// Raw relationship bitset.
    pub fn rel_bits(&self) -> u64 {
        self.rels
    }

    /// DP level of this subgraph: its relationship count.
    pub fn level(&self) -> usize {
        self.rels.count_ones() as usize
    }

    /// Number of selected nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.count_ones() as usize
    }

    /// Number of selected relationships.
    pub fn num_rels(&self) -> usize {
        self.level()
    }

    /// `true` when nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.nodes == 0 && self.rels == 0
    }

    /// `true` when exactly one relationship and its two endpoints are selected.
    pub fn is_single_rel(&self) -> bool {
        self.rels.count_ones() == 1 && self.nodes == self.endpoint_bits(self.rels)
    }

    /// Selects node `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= MAX_QUERY_VARIABLES`.
    pub fn add_node(&mut self, pos: usize) {
        assert!(
            pos < MAX_QUERY_VARIABLES,
            "node position {pos} exceeds subgraph capacity {MAX_QUERY_VARIABLES}"
        );
        self.nodes |= 1 << pos;
    }

    /// Selects relationship `pos` together with both of its endpoints.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= MAX_QUERY_VARIABLES` or `pos` is not a relationship
    /// of the owning graph.
    pub fn add_rel(&mut self, pos: usize) {
        assert!(
            pos < MAX_QUERY_VARIABLES,
            "relationship position {pos} exceeds subgraph capacity {MAX_QUERY_VARIABLES}"
        );
        let (src, dst) = self.graph.rel_endpoints(pos);
        self.rels |= 1 << pos;
        self.add_node(src);
        self.add_node(dst);
    }

    /// Copy of `self` with relationship `pos` added.
    pub fn with_rel(mut self, pos: usize) -> Self {
        self.add_rel(pos);
        self
    }

    /// Copy of `self` with node `pos` added.
    pub fn with_node(mut self, pos: usize) -> Self {
        self.add_node(pos);
        self
    }

    /// Bitwise union with `other`.
    pub fn merge(&mut self, other: &Subgraph<'_>) {
        debug_assert!(std::ptr::eq(self.graph, other.graph));
        self.nodes |= other.nodes;
        self.rels |= other.rels;
    }

    /// Union of two selectors as a new value.
    pub fn union(mut self, other: &Subgraph<'_>) -> Self {
        self.merge(other);
        self
    }

    /// `true` if node `pos` is selected.
    pub fn contains_node(&self, pos: usize) -> bool {
        pos < MAX_QUERY_VARIABLES && self.nodes & (1 << pos) != 0
    }

    /// `true` if relationship `pos` is selected.
    pub fn contains_rel(&self, pos: usize) -> bool {
        pos < MAX_QUERY_VARIABLES && self.rels & (1 << pos) != 0
    }

    /// `true` if every selected node and relationship of `other` is also selected here.
    pub fn contains(&self, other: &Subgraph<'_>) -> bool {
        self.nodes & other.nodes == other.nodes && self.rels & other.rels == other.rels
    }

    /// `true` if the two selectors share any node or relationship.
    pub fn intersects(&self, other: &Subgraph<'_>) -> bool {
        self.nodes & other.nodes != 0 || self.rels & other.rels != 0
    }

    /// `true` when each named variable bound in the graph is selected.
    ///
    /// Names the graph does not know are skipped: they belong to an outer
    /// scope and cannot be matched here anyway.
    pub fn contains_all_variables<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            if let Some(pos) = self.graph.node_position(name) {
                if !self.contains_node(pos) {
                    return false;
                }
            } else if let Some(pos) = self.graph.rel_position(name) {
                if !self.contains_rel(pos) {
                    return false;
                }
            }
        }
        true
    }

    /// Selected node positions in ascending order.
    pub fn node_positions(&self) -> impl Iterator<Item = usize> {
        BitIter(self.nodes)
    }

    /// Selected relationship positions in ascending order.
    pub fn rel_positions(&self) -> impl Iterator<Item = usize> {
        BitIter(self.rels)
    }

    /// Unselected endpoints of selected relationships.
    pub fn node_nbr_positions(&self) -> Vec<usize> {
        BitIter(self.endpoint_bits(self.rels) & !self.nodes).collect()
    }

    /// Unselected relationships with at least one selected endpoint.
    pub fn rel_nbr_positions(&self) -> Vec<usize> {
        (0..self.graph.num_rels())
            .filter(|&pos| !self.contains_rel(pos))
            .filter(|&pos| {
                let (src, dst) = self.graph.rel_endpoints(pos);
                self.contains_node(src) || self.contains_node(dst)
            })
            .collect()
    }

    /// Node positions through which `self` and `nbr` connect.
    pub fn connected_node_positions(&self, nbr: &Subgraph<'_>) -> Vec<usize> {
        let mut result: Vec<usize> = self
            .node_nbr_positions()
            .into_iter()
            .filter(|&pos| nbr.contains_node(pos))
            .collect();
        result.extend(
            nbr.node_nbr_positions()
                .into_iter()
                .filter(|&pos| self.contains_node(pos)),
        );
        result.extend(BitIter(self.nodes & nbr.nodes));
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Selected nodes plus every endpoint of a selected relationship, whether
    /// or not its node bit was set.
    pub fn node_positions_ignoring_node_selector(&self) -> Vec<usize> {
        BitIter(self.nodes | self.endpoint_bits(self.rels)).collect()
    }

    fn endpoint_bits(&self, rels: u64) -> u64 {
        BitIter(rels).fold(0u64, |acc, pos| {
            let (src, dst) = self.graph.rel_endpoints(pos);
            acc | (1 << src) | (1 << dst)
        })
    }
}

impl PartialEq for Subgraph<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.rels == other.rels
    }
}

impl Eq for Subgraph<'_> {}

impl Hash for Subgraph<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.rels == 0 {
            self.nodes.hash(state);
        } else {
            self.rels.hash(state);
        }
    }
}

impl PartialOrd for Subgraph<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Deterministic order used to iterate memo levels: relationships first, then nodes.
impl Ord for Subgraph<'_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.rels, self.nodes).cmp(&(other.rels, other.nodes))
    }
}

impl fmt::Debug for Subgraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<&str> = self
            .node_positions()
            .map(|pos| self.graph.node_name(pos))
            .collect();
        let rels: Vec<&str> = self
            .rel_positions()
            .map(|pos| self.graph.rel_name(pos))
            .collect();
        f.debug_struct("Subgraph")
            .field("nodes", &nodes)
            .field("rels", &rels)
            .finish()
    }
}

fn low_bits(count: usize) -> u64 {
    if count >= MAX_QUERY_VARIABLES {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

/// Iterates set bit positions from least to most significant.
struct BitIter(u64);

impl Iterator for BitIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let pos = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::graph::{QueryNode, QueryRel};
    use std::collections::hash_map::DefaultHasher;

    fn chain() -> QueryGraph {
        let mut graph = QueryGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_query_node(QueryNode::new(name)).expect("node");
        }
        graph.add_query_rel(QueryRel::new("r1", "a", "b")).expect("r1");
        graph.add_query_rel(QueryRel::new("r2", "b", "c")).expect("r2");
        graph
    }

    fn hash_of(subgraph: &Subgraph<'_>) -> u64 {
        let mut hasher = DefaultHasher::new();
        subgraph.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn adding_rel_selects_endpoints() {
        let graph = chain();
        let mut subgraph = Subgraph::new(&graph);
        subgraph.add_rel(1);
        assert!(subgraph.contains_rel(1));
        assert!(subgraph.contains_node(1));
        assert!(subgraph.contains_node(2));
        assert!(!subgraph.contains_node(0));
        assert!(subgraph.is_single_rel());
        assert_eq!(subgraph.level(), 1);
    }

    #[test]
    fn equality_checks_nodes_but_hash_ignores_them() {
        let graph = chain();
        let with_rel = Subgraph::new(&graph).with_rel(0);
        let with_extra_node = with_rel.with_node(2);
        assert_ne!(with_rel, with_extra_node);
        assert_eq!(hash_of(&with_rel), hash_of(&with_extra_node));
    }

    #[test]
    fn contains_all_variables_skips_unknown_names() {
        let graph = chain();
        let subgraph = Subgraph::new(&graph).with_rel(0);
        assert!(subgraph.contains_all_variables(["a", "b", "r1"]));
        assert!(subgraph.contains_all_variables(["outer_scope"]));
        assert!(!subgraph.contains_all_variables(["a", "c"]));
        assert!(!subgraph.contains_all_variables(["r2"]));
    }

    #[test]
    fn neighbour_positions() {
        let graph = chain();
        let left = Subgraph::new(&graph).with_rel(0);
        assert_eq!(left.rel_nbr_positions(), vec![1]);
        let right = Subgraph::new(&graph).with_rel(1);
        assert_eq!(left.connected_node_positions(&right), vec![1]);
        let mut only_a = Subgraph::new(&graph);
        only_a.add_node(0);
        assert_eq!(only_a.rel_nbr_positions(), vec![0]);
        assert_eq!(
            Subgraph::from_bits(&graph, 0, 0b10).node_positions_ignoring_node_selector(),
            vec![1, 2]
        );
    }

    #[test]
    fn full_selects_everything() {
        let graph = chain();
        let full = Subgraph::full(&graph);
        assert_eq!(full.node_bits(), 0b111);
        assert_eq!(full.rel_bits(), 0b11);
        assert!(full.contains(&Subgraph::new(&graph).with_rel(1)));
    }

    #[test]
    #[should_panic(expected = "exceeds subgraph capacity")]
    fn node_past_capacity_panics() {
        let mut graph = QueryGraph::new();
        for i in 0..MAX_QUERY_VARIABLES {
            graph
                .add_query_node(QueryNode::new(format!("n{i}")))
                .expect("node within capacity");
        }
        let mut subgraph = Subgraph::full(&graph);
        assert_eq!(subgraph.num_nodes(), MAX_QUERY_VARIABLES);
        subgraph.add_node(MAX_QUERY_VARIABLES);
    }
}
