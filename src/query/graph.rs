//! Query graph: the bound node and relationship variables of a pattern.
//!
//! Positions are dense, assigned in insertion order and never reused, so a
//! graph produced by [`QueryGraph::merge`] keeps every position of the graph it
//! was merged into.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::trace;

use crate::error::{Result, UmbralError};
use crate::query::ast::{EdgeDirection, Var};
use crate::query::subgraph::{Subgraph, MAX_QUERY_VARIABLES};

/// Node variable of a pattern with its label constraint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct QueryNode {
    /// Variable name, unique within a graph.
    pub name: Var,
    /// Labels the node must carry; empty means any label.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl QueryNode {
    /// Node variable without label constraints.
    pub fn new(name: impl Into<Var>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    /// Adds a label constraint.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

/// Relationship variable connecting two node variables.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct QueryRel {
    /// Variable name, unique within a graph.
    pub name: Var,
    /// Relationship types accepted; empty means any type.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Source node variable.
    pub src: Var,
    /// Destination node variable.
    pub dst: Var,
    /// Direction the pattern was written with.
    #[serde(default)]
    pub direction: EdgeDirection,
}

impl QueryRel {
    /// Directed relationship `(src)-[name]->(dst)` of any type.
    pub fn new(name: impl Into<Var>, src: impl Into<Var>, dst: impl Into<Var>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            src: src.into(),
            dst: dst.into(),
            direction: EdgeDirection::Out,
        }
    }

    /// Adds a relationship type constraint.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Overrides the pattern direction.
    pub fn with_direction(mut self, direction: EdgeDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Extension candidate reported by [`QueryGraph::connected_rels_with_direction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelCandidate {
    /// Relationship position.
    pub rel: usize,
    /// Whether the source node is already matched.
    pub src_matched: bool,
    /// Whether the destination node is already matched.
    pub dst_matched: bool,
}

/// Build-side candidate reported by [`QueryGraph::single_node_joining_subgraphs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinCandidate<'g> {
    /// Subgraph disjoint from the matched one except at `join_node`.
    pub subgraph: Subgraph<'g>,
    /// Position of the only node shared with the matched subgraph.
    pub join_node: usize,
}

/// Nodes and relationships of one connected pattern plus name indices.
#[derive(Clone, Debug, Default)]
pub struct QueryGraph {
    nodes: Vec<QueryNode>,
    rels: Vec<QueryRel>,
    rel_endpoints: Vec<(usize, usize)>,
    node_positions: FxHashMap<Var, usize>,
    rel_positions: FxHashMap<Var, usize>,
}

impl QueryGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node variables.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of relationship variables.
    pub fn num_rels(&self) -> usize {
        self.rels.len()
    }

    /// Appends `node` unless a node with the same name exists.
    ///
    /// Duplicates are ignored so that merging overlapping graphs is
    /// idempotent. Fails once the node capacity is exhausted.
    pub fn add_query_node(&mut self, node: QueryNode) -> Result<()> {
        if self.node_positions.contains_key(&node.name) {
            return Ok(());
        }
        if self.nodes.len() >= MAX_QUERY_VARIABLES {
            return Err(UmbralError::QueryTooComplex {
                kind: "node",
                max: MAX_QUERY_VARIABLES,
            });
        }
        let pos = self.nodes.len();
        trace!(name = %node.name, pos, "query.graph.add_node");
        self.node_positions.insert(node.name.clone(), pos);
        self.nodes.push(node);
        Ok(())
    }

    /// Appends `rel` unless a relationship with the same name exists.
    ///
    /// Both endpoints must already be nodes of this graph.
    pub fn add_query_rel(&mut self, rel: QueryRel) -> Result<()> {
        if self.rel_positions.contains_key(&rel.name) {
            return Ok(());
        }
        if self.rels.len() >= MAX_QUERY_VARIABLES {
            return Err(UmbralError::QueryTooComplex {
                kind: "relationship",
                max: MAX_QUERY_VARIABLES,
            });
        }
        let endpoint = |node: &Var| {
            self.node_positions
                .get(node)
                .copied()
                .ok_or_else(|| UmbralError::UnknownEndpoint {
                    rel: rel.name.0.clone(),
                    node: node.0.clone(),
                })
        };
        let endpoints = (endpoint(&rel.src)?, endpoint(&rel.dst)?);
        let pos = self.rels.len();
        trace!(name = %rel.name, pos, src = endpoints.0, dst = endpoints.1, "query.graph.add_rel");
        self.rel_positions.insert(rel.name.clone(), pos);
        self.rel_endpoints.push(endpoints);
        self.rels.push(rel);
        Ok(())
    }

    /// `true` if a node named `name` exists.
    pub fn contains_query_node(&self, name: &str) -> bool {
        self.node_position(name).is_some()
    }

    /// `true` if a relationship named `name` exists.
    pub fn contains_query_rel(&self, name: &str) -> bool {
        self.rel_position(name).is_some()
    }

    /// Position of node `name`, if bound.
    pub fn node_position(&self, name: &str) -> Option<usize> {
        self.node_positions.get(name).copied()
    }

    /// Position of relationship `name`, if bound.
    pub fn rel_position(&self, name: &str) -> Option<usize> {
        self.rel_positions.get(name).copied()
    }

    /// Position of node `name`, or [`UmbralError::UnknownVariable`].
    pub fn node_pos(&self, name: &str) -> Result<usize> {
        self.node_position(name)
            .ok_or_else(|| UmbralError::UnknownVariable {
                name: name.to_owned(),
            })
    }

    /// Position of relationship `name`, or [`UmbralError::UnknownVariable`].
    pub fn rel_pos(&self, name: &str) -> Result<usize> {
        self.rel_position(name)
            .ok_or_else(|| UmbralError::UnknownVariable {
                name: name.to_owned(),
            })
    }

    /// Node named `name`.
    ///
    /// # Panics
    ///
    /// Panics if the node is absent; check [`QueryGraph::contains_query_node`] first.
    pub fn query_node(&self, name: &str) -> &QueryNode {
        match self.node_position(name) {
            Some(pos) => &self.nodes[pos],
            None => panic!("query node '{name}' is not bound in this graph"),
        }
    }

    /// Relationship named `name`.
    ///
    /// # Panics
    ///
    /// Panics if the relationship is absent; check [`QueryGraph::contains_query_rel`] first.
    pub fn query_rel(&self, name: &str) -> &QueryRel {
        match self.rel_position(name) {
            Some(pos) => &self.rels[pos],
            None => panic!("query relationship '{name}' is not bound in this graph"),
        }
    }

    /// Node at `pos`.
    pub fn node_at(&self, pos: usize) -> &QueryNode {
        &self.nodes[pos]
    }

    /// Relationship at `pos`.
    pub fn rel_at(&self, pos: usize) -> &QueryRel {
        &self.rels[pos]
    }

    /// All nodes in position order.
    pub fn nodes(&self) -> &[QueryNode] {
        &self.nodes
    }

    /// All relationships in position order.
    pub fn rels(&self) -> &[QueryRel] {
        &self.rels
    }

    /// `(src, dst)` node positions of relationship `pos`.
    pub fn rel_endpoints(&self, pos: usize) -> (usize, usize) {
        self.rel_endpoints[pos]
    }

    pub(crate) fn node_name(&self, pos: usize) -> &str {
        self.nodes[pos].name.as_str()
    }

    pub(crate) fn rel_name(&self, pos: usize) -> &str {
        self.rels[pos].name.as_str()
    }

    /// Adds every node and then every relationship of `other`, skipping names
    /// already bound here.
    pub fn merge(&mut self, other: &QueryGraph) -> Result<()> {
        for node in &other.nodes {
            self.add_query_node(node.clone())?;
        }
        for rel in &other.rels {
            self.add_query_rel(rel.clone())?;
        }
        Ok(())
    }

    /// `true` if the graphs share at least one node name.
    pub fn is_connected(&self, other: &QueryGraph) -> bool {
        self.nodes
            .iter()
            .any(|node| other.node_positions.contains_key(&node.name))
    }

    /// `true` if every node is reachable from node 0 through relationships.
    pub fn is_fully_connected(&self) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        let mut reached = Subgraph::new(self).with_node(0);
        loop {
            let next = self.connected_rels_with_direction(&reached);
            if next.is_empty() {
                break;
            }
            for candidate in next {
                reached.add_rel(candidate.rel);
            }
        }
        reached.num_nodes() == self.nodes.len()
    }

    /// Extension candidates for the extend-by-one-relationship move.
    ///
    /// Every relationship outside `matched` with at least one endpoint inside it
    /// is reported once, in ascending position order.
    pub fn connected_rels_with_direction(&self, matched: &Subgraph<'_>) -> Vec<RelCandidate> {
        self.rel_endpoints
            .iter()
            .enumerate()
            .filter(|(rel, _)| !matched.contains_rel(*rel))
            .filter_map(|(rel, &(src, dst))| {
                let src_matched = matched.contains_node(src);
                let dst_matched = matched.contains_node(dst);
                (src_matched || dst_matched).then_some(RelCandidate {
                    rel,
                    src_matched,
                    dst_matched,
                })
            })
            .collect()
    }

    /// Every connected subgraph of exactly `size` relationships that shares
    /// exactly one node (the join node) and no relationship with `matched`.
    ///
    /// The search is exhaustive: it seeds with each relationship that has one
    /// endpoint in `matched` and grows the seeds one adjacent relationship at a
    /// time, so its cost is exponential in `size` for dense patterns. Results
    /// are sorted by subgraph and join node.
    pub fn single_node_joining_subgraphs<'g>(
        &'g self,
        matched: &Subgraph<'g>,
        size: usize,
    ) -> Vec<JoinCandidate<'g>> {
        if size == 0 {
            return Vec::new();
        }
        let mut frontier = BTreeSet::new();
        for (rel, &(src, dst)) in self.rel_endpoints.iter().enumerate() {
            if matched.contains_rel(rel) {
                continue;
            }
            let join_node = match (matched.contains_node(src), matched.contains_node(dst)) {
                (true, false) => src,
                (false, true) => dst,
                _ => continue,
            };
            frontier.insert((Subgraph::new(self).with_rel(rel), join_node));
        }
        for _ in 1..size {
            let mut next = BTreeSet::new();
            for (candidate, join_node) in &frontier {
                for (rel, &(src, dst)) in self.rel_endpoints.iter().enumerate() {
                    if matched.contains_rel(rel) || candidate.contains_rel(rel) {
                        continue;
                    }
                    if !candidate.contains_node(src) && !candidate.contains_node(dst) {
                        continue;
                    }
                    let touches_elsewhere = |node: usize| node != *join_node && matched.contains_node(node);
                    if touches_elsewhere(src) || touches_elsewhere(dst) {
                        continue;
                    }
                    next.insert((candidate.with_rel(rel), *join_node));
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }
        frontier
            .into_iter()
            .map(|(subgraph, join_node)| JoinCandidate {
                subgraph,
                join_node,
            })
            .collect()
    }
}

/// Set of query graphs where graphs sharing a node are merged.
#[derive(Clone, Debug, Default)]
pub struct QueryGraphCollection {
    graphs: Vec<QueryGraph>,
}

impl QueryGraphCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `graph` into every graph it shares a node with, or appends it
    /// as a new component.
    pub fn add_and_merge_if_connected(&mut self, graph: QueryGraph) -> Result<()> {
        let mut merged = false;
        for existing in &mut self.graphs {
            if existing.is_connected(&graph) {
                existing.merge(&graph)?;
                merged = true;
            }
        }
        if !merged {
            self.graphs.push(graph);
        }
        Ok(())
    }

    /// Merges components that became connected through later additions.
    ///
    /// Starting from the first graph, repeatedly absorbs the first remaining
    /// graph connected to it; the rest stay separate components.
    pub fn finalize(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.graphs);
        let mut finished = Vec::new();
        while !pending.is_empty() {
            let mut base = pending.remove(0);
            loop {
                let Some(idx) = pending.iter().position(|g| base.is_connected(g)) else {
                    break;
                };
                let other = pending.remove(idx);
                base.merge(&other)?;
            }
            finished.push(base);
        }
        self.graphs = finished;
        Ok(())
    }

    /// Number of connected components.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// `true` if the collection holds no graph.
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Components in insertion order.
    pub fn graphs(&self) -> &[QueryGraph] {
        &self.graphs
    }

    /// All nodes of all components.
    pub fn query_nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.graphs.iter().flat_map(|g| g.nodes.iter())
    }

    /// All relationships of all components.
    pub fn query_rels(&self) -> impl Iterator<Item = &QueryRel> {
        self.graphs.iter().flat_map(|g| g.rels.iter())
    }
}
