#![allow(missing_docs)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use umbral::query::{
    EdgeDirection, InMemoryStatistics, JoinOrderEnumerator, PlannerConfig, Predicate, QueryGraph,
    QueryNode, QueryPart, QueryRel, Subgraph, MAX_QUERY_VARIABLES,
};
use umbral::UmbralError;

fn graph_from(nodes: &[&str], rels: &[(&str, &str, &str)]) -> QueryGraph {
    let mut graph = QueryGraph::new();
    for name in nodes {
        graph
            .add_query_node(QueryNode::new(*name).with_label("Person"))
            .expect("add node");
    }
    for (name, src, dst) in rels {
        graph
            .add_query_rel(QueryRel::new(*name, *src, *dst).with_label("KNOWS"))
            .expect("add rel");
    }
    graph
}

fn enumerator(config: PlannerConfig) -> JoinOrderEnumerator {
    let stats = InMemoryStatistics::new()
        .with_node_count("Person", 1_000.0)
        .with_rel_count("KNOWS", 5_000.0);
    JoinOrderEnumerator::new(config, Arc::new(stats))
}

#[test]
fn three_node_chain_reaches_full_subgraph_by_level_two() {
    let graph = graph_from(&["a", "b", "c"], &[("r1", "a", "b"), ("r2", "b", "c")]);
    let memo = enumerator(PlannerConfig::new())
        .build_memo(&graph, &[])
        .expect("memo");

    let full = Subgraph::full(&graph);
    assert_eq!(full.level(), 2);
    assert!(memo.contains_plans(&full));
    assert!(memo.subgraphs_at(2).contains(&full));

    let r1 = graph.rel_pos("r1").expect("r1");
    let r2 = graph.rel_pos("r2").expect("r2");
    let matched = Subgraph::new(&graph).with_rel(r1);
    let candidates = graph.connected_rels_with_direction(&matched);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].rel, r2);
    assert!(candidates[0].src_matched, "b is matched");
    assert!(!candidates[0].dst_matched, "c is not matched");
}

#[test]
fn incoming_rel_reports_matched_destination() {
    let mut graph = QueryGraph::new();
    for name in ["a", "b", "c"] {
        graph.add_query_node(QueryNode::new(name)).expect("node");
    }
    graph
        .add_query_rel(QueryRel::new("r1", "a", "b"))
        .expect("r1");
    graph
        .add_query_rel(QueryRel::new("r2", "c", "b").with_direction(EdgeDirection::In))
        .expect("r2");
    let matched = Subgraph::new(&graph).with_rel(0);
    let candidates = graph.connected_rels_with_direction(&matched);
    assert_eq!(candidates.len(), 1);
    assert!(!candidates[0].src_matched);
    assert!(candidates[0].dst_matched);
}

#[test]
fn graph_rejects_variables_past_capacity() {
    let mut graph = QueryGraph::new();
    for i in 0..MAX_QUERY_VARIABLES {
        graph
            .add_query_node(QueryNode::new(format!("n{i}")))
            .expect("within capacity");
    }
    match graph.add_query_node(QueryNode::new("overflow")) {
        Err(UmbralError::QueryTooComplex { kind, max }) => {
            assert_eq!(kind, "node");
            assert_eq!(max, MAX_QUERY_VARIABLES);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(graph.num_nodes(), MAX_QUERY_VARIABLES);
}

#[test]
fn subgraph_fails_fast_one_past_capacity() {
    let mut graph = QueryGraph::new();
    for i in 0..MAX_QUERY_VARIABLES {
        graph
            .add_query_node(QueryNode::new(format!("n{i}")))
            .expect("within capacity");
    }
    let full = Subgraph::full(&graph);
    assert_eq!(full.num_nodes(), MAX_QUERY_VARIABLES);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut subgraph = Subgraph::full(&graph);
        subgraph.add_node(MAX_QUERY_VARIABLES);
    }));
    assert!(result.is_err(), "adding node 64 must not wrap around");
}

#[test]
fn best_plan_renders_every_variable() {
    let graph = graph_from(
        &["a", "b", "c", "d"],
        &[("r1", "a", "b"), ("r2", "b", "c"), ("r3", "c", "d")],
    );
    let predicates = vec![Predicate::new("a.age > 30", ["a"])];
    let output = enumerator(PlannerConfig::new())
        .enumerate(&graph, &predicates)
        .expect("enumerate");

    let rendered = output.explain.render();
    for var in ["a", "b", "c", "d", "r1", "r2", "r3"] {
        assert!(
            rendered.contains(var),
            "variable {var} missing from plan:\n{rendered}"
        );
    }
    assert_eq!(rendered.matches("Filter").count(), 1, "{rendered}");
    assert_eq!(output.best().num_filters(), 1);
    assert_eq!(output.plan_hash, output.best().plan_hash());
}

#[test]
fn hash_join_toggle_controls_join_operators() {
    let graph = graph_from(
        &["a", "b", "c", "d", "e"],
        &[
            ("r1", "a", "b"),
            ("r2", "b", "c"),
            ("r3", "c", "d"),
            ("r4", "d", "e"),
        ],
    );
    let config = PlannerConfig::new().max_plans_per_subgraph(16);
    let with_joins = enumerator(config.clone())
        .enumerate(&graph, &[])
        .expect("with joins");
    assert!(with_joins.plans.iter().any(|plan| plan.num_hash_joins() > 0));

    let without = enumerator(config.enable_hash_join(false))
        .enumerate(&graph, &[])
        .expect("without joins");
    assert!(without.plans.iter().all(|plan| plan.num_hash_joins() == 0));
}

#[test]
fn disconnected_pattern_has_no_full_plan() {
    let graph = graph_from(&["a", "b", "c", "d"], &[("r1", "a", "b"), ("r2", "c", "d")]);
    match enumerator(PlannerConfig::new()).enumerate(&graph, &[]) {
        Err(UmbralError::NoPlanForFullyMatched { .. }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn later_part_builds_on_earlier_plans() {
    let first = graph_from(&["a", "b"], &[("r1", "a", "b")]);
    let second = graph_from(&["b", "c"], &[("r2", "b", "c")]);
    let parts = vec![
        QueryPart::new(first, vec![Predicate::new("a.x = 1", ["a"])]),
        QueryPart::new(second, vec![Predicate::new("c.y = 2", ["c"])]),
    ];
    let output = enumerator(PlannerConfig::new())
        .enumerate_parts(&parts)
        .expect("enumerate parts");
    let rendered = output.explain.render();
    for var in ["a", "b", "c", "r1", "r2"] {
        assert!(rendered.contains(var), "{var} missing:\n{rendered}");
    }
    assert_eq!(output.best().num_filters(), 2);
}
