//! Dynamic-programming join-order enumeration over query-graph subgraphs.
//!
//! The sweep runs level by level, where level `k` holds subgraphs with `k`
//! relationships:
//!
//! * level 0 is seeded with one node scan per node variable;
//! * level 1 additionally receives relationship scans in both directions;
//! * every level `k >= 1` extends each level `k - 1` subgraph by one adjacent
//!   relationship, and (when enabled) hash-joins a level `j` subgraph with a
//!   disjoint level `k - j` subgraph that touches it at a single node.
//!
//! After a level is complete its candidate lists are ranked with the
//! configured [`PlanComparator`] and truncated. Enumeration of one query is
//! single-threaded.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, UmbralError};
use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::query::ast::{EdgeDirection, ExtendDirection};
use crate::query::cost::{
    extend_cost, hash_join_cardinality, hash_join_cost, CostComparator, PlanComparator,
};
use crate::query::graph::{QueryGraph, RelCandidate};
use crate::query::logical::{LogicalOp, LogicalPlan, PlanExplain, PlanNode};
use crate::query::metadata::StatisticsProvider;
use crate::query::predicate::{newly_matched, Predicate};
use crate::query::subgraph::Subgraph;
use crate::query::subplans::SubplanTable;

/// Planner configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Whether hash-join moves are generated in addition to extends.
    pub enable_hash_join: bool,
    /// Candidates kept per subgraph after each level is ranked.
    pub max_plans_per_subgraph: usize,
    /// Optional cap on build-side candidates examined per probe subgraph.
    /// `None` keeps the search exhaustive.
    pub hash_join_search_limit: Option<usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerConfig {
    /// Hash joins enabled, four candidates per subgraph, uncapped search.
    pub fn new() -> Self {
        Self {
            enable_hash_join: true,
            max_plans_per_subgraph: 4,
            hash_join_search_limit: None,
        }
    }

    /// Enables or disables hash-join moves.
    pub fn enable_hash_join(mut self, enabled: bool) -> Self {
        self.enable_hash_join = enabled;
        self
    }

    /// Sets the number of candidates kept per subgraph (at least one).
    pub fn max_plans_per_subgraph(mut self, limit: usize) -> Self {
        self.max_plans_per_subgraph = limit.max(1);
        self
    }

    /// Caps the single-join-node search.
    pub fn hash_join_search_limit(mut self, limit: Option<usize>) -> Self {
        self.hash_join_search_limit = limit;
        self
    }
}

/// One `WITH`-delimited part of a query.
#[derive(Clone, Debug, Default)]
pub struct QueryPart {
    /// Pattern introduced by this part. May repeat variables of earlier parts.
    pub graph: QueryGraph,
    /// Conjuncts of this part's WHERE clause.
    pub predicates: Vec<Predicate>,
}

impl QueryPart {
    /// Creates a part from its pattern and conjuncts.
    pub fn new(graph: QueryGraph, predicates: Vec<Predicate>) -> Self {
        Self { graph, predicates }
    }
}

/// Result of a complete enumeration.
#[derive(Clone, Debug)]
pub struct EnumeratorOutput {
    /// Candidate plans for the fully matched subgraph, best first.
    pub plans: Vec<LogicalPlan>,
    /// Explain tree of the best plan.
    pub explain: PlanExplain,
    /// Deterministic hash of the best plan.
    pub plan_hash: u64,
    /// Subgraphs that received at least one plan during the final sweep.
    pub subgraphs_planned: usize,
}

impl EnumeratorOutput {
    /// The chosen plan.
    pub fn best(&self) -> &LogicalPlan {
        &self.plans[0]
    }
}

/// DP join-order enumerator.
pub struct JoinOrderEnumerator {
    config: PlannerConfig,
    stats: Arc<dyn StatisticsProvider>,
    comparator: Arc<dyn PlanComparator>,
}

impl JoinOrderEnumerator {
    /// Creates an enumerator ranking candidates with [`CostComparator`].
    pub fn new(config: PlannerConfig, stats: Arc<dyn StatisticsProvider>) -> Self {
        Self {
            config,
            stats,
            comparator: Arc::new(CostComparator),
        }
    }

    /// Replaces the candidate comparator.
    pub fn with_comparator(mut self, comparator: Arc<dyn PlanComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans a single-part query.
    pub fn enumerate(&self, graph: &QueryGraph, predicates: &[Predicate]) -> Result<EnumeratorOutput> {
        let memo = self.build_memo(graph, predicates)?;
        self.finish(&memo, Subgraph::full(graph))
    }

    /// Runs the sweep for `graph` and returns the populated memo.
    ///
    /// Fails with [`UmbralError::NoPlanForFullyMatched`] when no plan covers
    /// the whole graph, which happens for disconnected patterns.
    pub fn build_memo<'g>(
        &self,
        graph: &'g QueryGraph,
        predicates: &[Predicate],
    ) -> Result<SubplanTable<'g>> {
        if graph.num_nodes() == 0 {
            return Err(UmbralError::Invalid("query graph has no nodes"));
        }
        let mut memo = SubplanTable::new();
        self.sweep(graph, predicates, Subgraph::full(graph), None, &mut memo)?;
        Ok(memo)
    }

    /// Plans a multi-part query.
    ///
    /// Parts are merged into one graph up front so positions stay stable. Each
    /// part's sweep starts from the previous part's fully matched plans, which
    /// are re-seeded into a cleared memo at their level.
    pub fn enumerate_parts(&self, parts: &[QueryPart]) -> Result<EnumeratorOutput> {
        if parts.is_empty() {
            return Err(UmbralError::Invalid("no query parts to plan"));
        }
        let mut graph = QueryGraph::new();
        let mut extents = Vec::with_capacity(parts.len());
        for part in parts {
            graph.merge(&part.graph)?;
            extents.push((graph.num_nodes(), graph.num_rels()));
        }
        if graph.num_nodes() == 0 {
            return Err(UmbralError::Invalid("query graph has no nodes"));
        }
        let graph = graph;
        let mut memo = SubplanTable::new();
        let mut previous: Option<Subgraph<'_>> = None;
        for (idx, (part, &(num_nodes, num_rels))) in parts.iter().zip(&extents).enumerate() {
            let mut scope = Subgraph::new(&graph);
            (0..num_nodes).for_each(|pos| scope.add_node(pos));
            (0..num_rels).for_each(|pos| scope.add_rel(pos));
            let seed = previous.map(|prev| {
                let plans = memo.take_plans(&prev);
                memo.clear();
                (prev, plans)
            });
            debug!(part = idx, nodes = num_nodes, rels = num_rels, "query.enumerate.part");
            self.sweep(&graph, &part.predicates, scope, seed, &mut memo)?;
            previous = Some(scope);
        }
        let full = previous.ok_or(UmbralError::Invalid("no query parts to plan"))?;
        self.finish(&memo, full)
    }

    fn finish(&self, memo: &SubplanTable<'_>, full: Subgraph<'_>) -> Result<EnumeratorOutput> {
        let mut plans = memo.plans(&full).to_vec();
        if plans.is_empty() {
            return Err(UmbralError::NoPlanForFullyMatched {
                nodes: full.node_bits(),
                rels: full.rel_bits(),
            });
        }
        plans.sort_by(|a, b| self.comparator.compare(a, b));
        let explain = plans[0].explain();
        let plan_hash = plans[0].plan_hash();
        debug!(
            candidates = plans.len(),
            cost = plans[0].cost,
            plan_hash,
            "query.enumerate.done"
        );
        Ok(EnumeratorOutput {
            plans,
            explain,
            plan_hash,
            subgraphs_planned: memo.num_subgraphs(),
        })
    }

    fn sweep<'g>(
        &self,
        graph: &'g QueryGraph,
        predicates: &[Predicate],
        scope: Subgraph<'g>,
        seed: Option<(Subgraph<'g>, Vec<LogicalPlan>)>,
        memo: &mut SubplanTable<'g>,
    ) -> Result<()> {
        if let Some(predicate) = predicates.iter().find(|p| !p.is_anchored_in(graph)) {
            return Err(UmbralError::InvalidArgument(format!(
                "predicate '{}' references no variable of the pattern",
                predicate.expr
            )));
        }
        let start = profile_timer();
        let max_level = scope.level();
        memo.resize(max_level);

        let mut seeded = Subgraph::new(graph);
        if let Some((seed_subgraph, plans)) = seed {
            for plan in plans {
                let plan = self.apply_filters(plan, predicates, &seed_subgraph, &[]);
                memo.add_plan(seed_subgraph, plan);
            }
            seeded = seed_subgraph;
        }

        for pos in scope.node_positions() {
            if seeded.contains_node(pos) {
                continue;
            }
            let subgraph = Subgraph::new(graph).with_node(pos);
            let plan = self.plan_node_scan(graph, pos, predicates, &subgraph);
            memo.add_plan(subgraph, plan);
        }
        self.rank_level(memo, 0);

        for level in 1..=max_level {
            self.plan_extends(graph, predicates, &scope, level, memo);
            if level == 1 {
                self.plan_rel_scans(graph, predicates, &scope, &seeded, memo);
            }
            if self.config.enable_hash_join && level >= 2 {
                self.plan_hash_joins(graph, predicates, &scope, level, memo);
            } else if level >= 2 {
                // Without hash joins only the previous level feeds the next.
                memo.clear_levels_below(level - 1);
            }
            self.rank_level(memo, level);
            debug!(
                level,
                subgraphs = memo.subgraphs_at(level).len(),
                "query.enumerate.level"
            );
        }
        record_profile_timer(ProfileKind::Enumerate, start);

        if !memo.contains_plans(&scope) {
            return Err(UmbralError::NoPlanForFullyMatched {
                nodes: scope.node_bits(),
                rels: scope.rel_bits(),
            });
        }
        Ok(())
    }

    fn rank_level(&self, memo: &mut SubplanTable<'_>, level: usize) {
        let comparator = Arc::clone(&self.comparator);
        memo.sort_and_truncate(level, self.config.max_plans_per_subgraph, |a, b| {
            comparator.compare(a, b)
        });
    }

    fn plan_node_scan(
        &self,
        graph: &QueryGraph,
        pos: usize,
        predicates: &[Predicate],
        subgraph: &Subgraph<'_>,
    ) -> LogicalPlan {
        let node = graph.node_at(pos);
        let cardinality = self.stats.node_count(&node.labels);
        let op = LogicalOp::ScanNode {
            var: node.name.clone(),
            labels: node.labels.clone(),
        };
        let plan = LogicalPlan::new(PlanNode::new(op), cardinality, cardinality);
        self.apply_filters(plan, predicates, subgraph, &[])
    }

    fn plan_rel_scans<'g>(
        &self,
        graph: &'g QueryGraph,
        predicates: &[Predicate],
        scope: &Subgraph<'g>,
        seeded: &Subgraph<'g>,
        memo: &mut SubplanTable<'g>,
    ) {
        for pos in scope.rel_positions() {
            if seeded.contains_rel(pos) {
                continue;
            }
            let rel = graph.rel_at(pos);
            let (src, dst) = graph.rel_endpoints(pos);
            let subgraph = Subgraph::new(graph).with_rel(pos);
            let cardinality = self.stats.rel_count(&rel.labels);
            for (from, to, from_src) in [(src, dst, true), (dst, src, false)] {
                let op = LogicalOp::ScanRel {
                    rel: rel.name.clone(),
                    from: graph.node_at(from).name.clone(),
                    to: graph.node_at(to).name.clone(),
                    direction: ExtendDirection::for_edge(rel.direction, from_src),
                };
                let plan = LogicalPlan::new(PlanNode::new(op), cardinality, cardinality);
                let plan = self.apply_filters(plan, predicates, &subgraph, &[]);
                memo.add_plan(subgraph, plan);
            }
        }
    }

    fn plan_extends<'g>(
        &self,
        graph: &'g QueryGraph,
        predicates: &[Predicate],
        scope: &Subgraph<'g>,
        level: usize,
        memo: &mut SubplanTable<'g>,
    ) {
        let start = profile_timer();
        let mut produced = Vec::new();
        for prev in memo.subgraphs_at(level - 1) {
            for candidate in graph.connected_rels_with_direction(&prev) {
                if !scope.contains_rel(candidate.rel) {
                    continue;
                }
                let next = prev.with_rel(candidate.rel);
                for input in memo.plans(&prev) {
                    let plan = self.plan_extend(graph, input, candidate, predicates, &prev, &next);
                    produced.push((next, plan));
                }
            }
        }
        for (subgraph, plan) in produced {
            memo.add_plan(subgraph, plan);
        }
        record_profile_timer(ProfileKind::Extend, start);
    }

    fn plan_extend(
        &self,
        graph: &QueryGraph,
        input: &LogicalPlan,
        candidate: RelCandidate,
        predicates: &[Predicate],
        prev: &Subgraph<'_>,
        next: &Subgraph<'_>,
    ) -> LogicalPlan {
        let rel = graph.rel_at(candidate.rel);
        let (src, dst) = graph.rel_endpoints(candidate.rel);
        let (from, to, from_src) = if candidate.src_matched {
            (src, dst, true)
        } else {
            (dst, src, false)
        };
        let closing = candidate.src_matched && candidate.dst_matched;
        let from_node = graph.node_at(from);
        let to_node = graph.node_at(to);
        let mut rate = self.stats.extension_rate(rel, from_node);
        if rel.direction == EdgeDirection::Both {
            rate *= 2.0;
        }
        let mut cardinality = input.cardinality * rate;
        if closing {
            // Only neighbours that equal the already-bound node survive.
            cardinality /= self.stats.node_count(&to_node.labels).max(1.0);
        }
        let op = LogicalOp::Extend {
            from: from_node.name.clone(),
            to: to_node.name.clone(),
            rel: rel.name.clone(),
            direction: ExtendDirection::for_edge(rel.direction, from_src),
            closing,
        };
        let node = PlanNode::with_inputs(op, vec![Arc::clone(&input.root)]);
        let plan = LogicalPlan::new(node, cardinality, extend_cost(input, cardinality));
        self.apply_filters(plan, predicates, next, std::slice::from_ref(prev))
    }

    fn plan_hash_joins<'g>(
        &self,
        graph: &'g QueryGraph,
        predicates: &[Predicate],
        scope: &Subgraph<'g>,
        level: usize,
        memo: &mut SubplanTable<'g>,
    ) {
        let start = profile_timer();
        let mut produced = Vec::new();
        for probe_level in 1..level {
            let build_level = level - probe_level;
            for probe in memo.subgraphs_at(probe_level) {
                let mut candidates = graph.single_node_joining_subgraphs(&probe, build_level);
                if let Some(limit) = self.config.hash_join_search_limit {
                    if candidates.len() > limit {
                        warn!(
                            level,
                            found = candidates.len(),
                            limit,
                            "query.enumerate.hash_join_search_truncated"
                        );
                        candidates.truncate(limit);
                    }
                }
                for candidate in candidates {
                    let build = candidate.subgraph;
                    if !scope.contains(&build) {
                        continue;
                    }
                    let (Some(probe_plan), Some(build_plan)) =
                        (memo.plans(&probe).first(), memo.plans(&build).first())
                    else {
                        continue;
                    };
                    let joined = probe.union(&build);
                    let join_node = graph.node_at(candidate.join_node);
                    let cardinality = hash_join_cardinality(
                        probe_plan,
                        build_plan,
                        self.stats.node_count(&join_node.labels),
                    );
                    let op = LogicalOp::HashJoin {
                        join_node: join_node.name.clone(),
                    };
                    let node = PlanNode::with_inputs(
                        op,
                        vec![Arc::clone(&probe_plan.root), Arc::clone(&build_plan.root)],
                    );
                    let plan = LogicalPlan::new(
                        node,
                        cardinality,
                        hash_join_cost(probe_plan, build_plan),
                    );
                    let plan = self.apply_filters(plan, predicates, &joined, &[probe, build]);
                    produced.push((joined, plan));
                }
            }
        }
        for (subgraph, plan) in produced {
            memo.add_plan(subgraph, plan);
        }
        record_profile_timer(ProfileKind::HashJoin, start);
    }

    fn apply_filters(
        &self,
        mut plan: LogicalPlan,
        predicates: &[Predicate],
        next: &Subgraph<'_>,
        prev: &[Subgraph<'_>],
    ) -> LogicalPlan {
        for predicate in newly_matched(predicates, next, prev) {
            let op = LogicalOp::Filter {
                predicate: predicate.expr.clone(),
            };
            let node = PlanNode::with_inputs(op, vec![Arc::clone(&plan.root)]);
            plan = LogicalPlan::new(
                node,
                plan.cardinality * predicate.selectivity,
                plan.cost,
            );
        }
        plan
    }
}
