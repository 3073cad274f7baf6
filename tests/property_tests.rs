#![allow(missing_docs)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use proptest::prelude::*;
use umbral::exec::aggregate::{
    AggregateFunction, AggregateHashTable, AggregateInput, AggregateOptions, BuiltinAggregate,
    ValueVector,
};
use umbral::query::{
    InMemoryStatistics, JoinOrderEnumerator, PlannerConfig, QueryGraph, QueryNode, QueryRel,
    Subgraph, Value,
};

fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..=8).prop_flat_map(|nodes| {
        let edge = (0..nodes, 0..nodes);
        (Just(nodes), prop::collection::vec(edge, 1..=10))
    })
}

fn build_graph(nodes: usize, rels: &[(usize, usize)]) -> QueryGraph {
    let mut graph = QueryGraph::new();
    for i in 0..nodes {
        graph
            .add_query_node(QueryNode::new(format!("n{i}")))
            .expect("node");
    }
    for (i, (src, dst)) in rels.iter().enumerate() {
        graph
            .add_query_rel(QueryRel::new(
                format!("r{i}"),
                format!("n{src}"),
                format!("n{dst}"),
            ))
            .expect("rel");
    }
    graph
}

fn hash_of(subgraph: &Subgraph<'_>) -> u64 {
    let mut hasher = DefaultHasher::new();
    subgraph.hash(&mut hasher);
    hasher.finish()
}

/// Nodes reachable from `start` using only the relationships of `subgraph`.
fn reachable(graph: &QueryGraph, subgraph: &Subgraph<'_>, start: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::from([start]);
    loop {
        let before = seen.len();
        for rel in subgraph.rel_positions() {
            let (src, dst) = graph.rel_endpoints(rel);
            if seen.contains(&src) || seen.contains(&dst) {
                seen.insert(src);
                seen.insert(dst);
            }
        }
        if seen.len() == before {
            return seen;
        }
    }
}

/// A random spanning tree plus extra edges, self-loops and parallel edges included.
fn arb_connected_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..=6).prop_flat_map(|nodes| {
        let parents: Vec<_> = (1..nodes).map(|child| (0..child, any::<bool>())).collect();
        let extra = prop::collection::vec((0..nodes, 0..nodes), 0..=3);
        (Just(nodes), parents, extra).prop_map(|(nodes, parents, extra)| {
            let mut rels: Vec<(usize, usize)> = parents
                .into_iter()
                .enumerate()
                .map(|(idx, (parent, forward))| {
                    let child = idx + 1;
                    if forward { (parent, child) } else { (child, parent) }
                })
                .collect();
            rels.extend(extra);
            (nodes, rels)
        })
    })
}

/// Appends one chunk where every non-COUNT(*) aggregate reads `values`.
fn append_batch(
    table: &mut AggregateHashTable,
    flat_keys: &[&ValueVector],
    unflat_keys: &[&ValueVector],
    leading: &ValueVector,
    values: &ValueVector,
    multiplicity: u64,
) {
    let inputs: Vec<AggregateInput<'_>> = table
        .functions()
        .iter()
        .map(|function| {
            if function.is_count_star() {
                AggregateInput::none()
            } else {
                AggregateInput::vector(values)
            }
        })
        .collect();
    let leading = Arc::clone(leading.state());
    table
        .append(flat_keys, unflat_keys, &[], &leading, &inputs, multiplicity)
        .expect("append");
}

proptest! {
    #[test]
    fn prop_rel_bits_imply_endpoint_bits(
        (nodes, rels) in arb_graph(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let graph = build_graph(nodes, &rels);
        let mut subgraph = Subgraph::new(&graph);
        for pick in &picks {
            subgraph.add_rel(pick.index(graph.num_rels()));
        }
        for rel in subgraph.rel_positions() {
            let (src, dst) = graph.rel_endpoints(rel);
            prop_assert!(subgraph.contains_node(src));
            prop_assert!(subgraph.contains_node(dst));
        }
    }

    #[test]
    fn prop_equal_subgraphs_hash_equal(
        (nodes, rels) in arb_graph(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let graph = build_graph(nodes, &rels);
        let positions: Vec<usize> = picks.iter().map(|p| p.index(graph.num_rels())).collect();
        let mut forward = Subgraph::new(&graph);
        for &rel in &positions {
            forward.add_rel(rel);
        }
        let mut backward = Subgraph::new(&graph);
        for &rel in positions.iter().rev() {
            backward.add_rel(rel);
        }
        prop_assert_eq!(forward, backward);
        prop_assert_eq!(hash_of(&forward), hash_of(&backward));
    }

    #[test]
    fn prop_join_candidates_touch_at_one_node(
        (nodes, rels) in arb_graph(),
        seed in any::<prop::sample::Index>(),
        size in 1usize..=3,
    ) {
        let graph = build_graph(nodes, &rels);
        let matched = Subgraph::new(&graph).with_rel(seed.index(graph.num_rels()));
        for candidate in graph.single_node_joining_subgraphs(&matched, size) {
            let subgraph = candidate.subgraph;
            prop_assert_eq!(subgraph.num_rels(), size);
            prop_assert!(subgraph.rel_positions().all(|rel| !matched.contains_rel(rel)));
            let shared: Vec<usize> = subgraph
                .node_positions()
                .filter(|&node| matched.contains_node(node))
                .collect();
            prop_assert_eq!(shared, vec![candidate.join_node]);
            let reached = reachable(&graph, &subgraph, candidate.join_node);
            prop_assert_eq!(reached, subgraph.node_positions().collect::<BTreeSet<_>>());
        }
    }

    #[test]
    fn prop_full_subgraph_is_planned_for_connected_graphs(
        (nodes, rels) in arb_connected_graph(),
    ) {
        let graph = build_graph(nodes, &rels);
        let enumerator = JoinOrderEnumerator::new(
            PlannerConfig::new(),
            Arc::new(InMemoryStatistics::new()),
        );
        let memo = enumerator.build_memo(&graph, &[]).expect("memo");
        prop_assert!(memo.contains_plans(&Subgraph::full(&graph)));
    }

    #[test]
    fn prop_aggregates_match_oracle(
        rows in prop::collection::vec((0i64..10, -100i64..100), 1..200),
        batch in 1usize..32,
        flat_batches in prop::collection::vec(any::<bool>(), 32),
        multiplicity in 1u64..4,
        split in any::<prop::sample::Index>(),
    ) {
        let functions: Vec<Arc<dyn AggregateFunction>> = vec![
            BuiltinAggregate::count_star().shared(),
            BuiltinAggregate::sum().shared(),
            BuiltinAggregate::min().shared(),
            BuiltinAggregate::max().shared(),
            BuiltinAggregate::count().distinct().shared(),
        ];
        let options = AggregateOptions::new().initial_slots(2);
        let new_table = || {
            AggregateHashTable::new(1, 0, functions.clone(), &options).expect("table")
        };

        // Chunks before `split` go to one table, the rest to another; the two
        // are merged. A flat chunk feeds its rows one tuple at a time with
        // `multiplicity`, an unflat chunk is appended as a single batch.
        let chunks: Vec<&[(i64, i64)]> = rows.chunks(batch).collect();
        let split = split.index(chunks.len() + 1);
        let mut left = new_table();
        let mut right = new_table();
        let mut oracle: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let table = if idx < split { &mut left } else { &mut right };
            if flat_batches[idx % flat_batches.len()] {
                for (key, value) in chunk.iter() {
                    let keys = ValueVector::flat(Value::Int(*key));
                    let values = ValueVector::flat(Value::Int(*value));
                    append_batch(table, &[&keys], &[], &keys, &values, multiplicity);
                    let seen = oracle.entry(*key).or_default();
                    seen.extend(std::iter::repeat(*value).take(multiplicity as usize));
                }
            } else {
                let keys = ValueVector::unflat(chunk.iter().map(|(k, _)| Value::Int(*k)).collect());
                let values = ValueVector::new(
                    chunk.iter().map(|(_, v)| Value::Int(*v)).collect(),
                    Arc::clone(keys.state()),
                );
                append_batch(table, &[], &[&keys], &keys, &values, 1);
                for (key, value) in chunk.iter() {
                    oracle.entry(*key).or_default().push(*value);
                }
            }
        }
        left.merge(&mut right).expect("merge");
        prop_assert!(right.is_empty());

        prop_assert_eq!(left.num_entries(), oracle.len());
        for (key, values) in &oracle {
            let states = left.get(&[Value::Int(*key)]).expect("group");
            let finalized: Vec<Value> = functions
                .iter()
                .zip(states)
                .map(|(function, state)| function.finalize(state))
                .collect();
            let distinct = values.iter().collect::<BTreeSet<_>>().len() as i64;
            let expected = vec![
                Value::Int(values.len() as i64),
                Value::Int(values.iter().sum()),
                Value::Int(*values.iter().min().expect("non-empty")),
                Value::Int(*values.iter().max().expect("non-empty")),
                Value::Int(distinct),
            ];
            prop_assert_eq!(finalized, expected);
        }
    }
}
