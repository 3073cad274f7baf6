#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use umbral::exec::aggregate::{
    parse_aggregate, AggregateFunction, AggregateHashTable, AggregateInput, AggregateOptions,
    AggregateState, BuiltinAggregate, HashAggregateLocalState, HashAggregateSharedState,
    Numeric, ValueVector,
};
use umbral::query::Value;
use umbral::UmbralError;

fn ints(values: &[i64]) -> ValueVector {
    ValueVector::unflat(values.iter().copied().map(Value::Int).collect())
}

fn table(functions: Vec<Arc<dyn AggregateFunction>>) -> AggregateHashTable {
    AggregateHashTable::new(1, 0, functions, &AggregateOptions::default()).expect("table")
}

/// Appends `(key, value)` rows; COUNT(*) columns receive no input.
fn append(table: &mut AggregateHashTable, keys: &[i64], values: &[i64]) {
    let keys = ints(keys);
    let values = ValueVector::new(
        values.iter().copied().map(Value::Int).collect(),
        Arc::clone(keys.state()),
    );
    let inputs: Vec<AggregateInput<'_>> = table
        .functions()
        .iter()
        .map(|function| {
            if function.is_count_star() {
                AggregateInput::none()
            } else {
                AggregateInput::vector(&values)
            }
        })
        .collect();
    let leading = Arc::clone(keys.state());
    table
        .append(&[], &[&keys], &[], &leading, &inputs, 1)
        .expect("append");
}

fn groups(table: &AggregateHashTable) -> BTreeMap<i64, Vec<Value>> {
    table
        .finalize_aggregate_states()
        .into_iter()
        .map(|row| match &row[0] {
            Value::Int(key) => (*key, row[1..].to_vec()),
            other => panic!("unexpected key: {other:?}"),
        })
        .collect()
}

#[test]
fn count_star_is_independent_of_batching() {
    let input = [1, 1, 2, 3, 2, 1];
    let expected: BTreeMap<i64, Vec<Value>> = [(1, 3), (2, 2), (3, 1)]
        .into_iter()
        .map(|(key, count)| (key, vec![Value::Int(count)]))
        .collect();

    let mut single = table(vec![BuiltinAggregate::count_star().shared()]);
    append(&mut single, &input, &input);
    assert_eq!(groups(&single), expected);

    let mut batched = table(vec![BuiltinAggregate::count_star().shared()]);
    for batch in input.chunks(2) {
        append(&mut batched, batch, batch);
    }
    assert_eq!(groups(&batched), expected);
}

#[test]
fn merge_combines_sums_and_empties_source() {
    let mut a = table(vec![BuiltinAggregate::sum().shared()]);
    append(&mut a, &[1, 2], &[10, 5]);
    let mut b = table(vec![BuiltinAggregate::sum().shared()]);
    append(&mut b, &[2, 3], &[3, 7]);

    assert_eq!(a.merge(&mut b).expect("merge"), 1);
    assert!(b.is_empty());
    assert_eq!(b.num_entries(), 0);

    assert_eq!(
        a.get(&[Value::Int(2)]).expect("group 2"),
        &[AggregateState::Sum(Some(Numeric::Int(8)))]
    );
    let expected: BTreeMap<i64, Vec<Value>> = [(1, 10), (2, 8), (3, 7)]
        .into_iter()
        .map(|(key, sum)| (key, vec![Value::Int(sum)]))
        .collect();
    assert_eq!(groups(&a), expected);

    // The emptied source stays usable.
    append(&mut b, &[4], &[1]);
    assert_eq!(b.num_entries(), 1);
}

#[test]
fn distinct_aggregates_survive_merge() {
    let functions = || {
        vec![
            BuiltinAggregate::count().distinct().shared(),
            BuiltinAggregate::sum().distinct().shared(),
        ]
    };
    let mut a = table(functions());
    append(&mut a, &[1, 1, 1], &[5, 5, 6]);
    let mut b = table(functions());
    append(&mut b, &[1, 1], &[6, 7]);

    a.merge(&mut b).expect("merge");
    let result = groups(&a);
    assert_eq!(result[&1], vec![Value::Int(3), Value::Int(18)]);
}

#[test]
fn every_builtin_finalizes() {
    let mut table = table(
        ["count:v", "sum:v", "avg:v", "min:v", "max:v", "collect:v"]
            .iter()
            .map(|spec| parse_aggregate(spec).expect("parse").0)
            .collect(),
    );
    append(&mut table, &[1, 1, 2], &[1, 3, 4]);
    let result = groups(&table);
    assert_eq!(
        result[&1],
        vec![
            Value::Int(2),
            Value::Int(4),
            Value::Float(2.0),
            Value::Int(1),
            Value::Int(3),
            Value::String("[1, 3]".into()),
        ]
    );
    assert_eq!(result[&2][0], Value::Int(1));
}

#[test]
fn parse_rejects_unknown_functions() {
    match parse_aggregate("median:x") {
        Err(UmbralError::InvalidArgument(message)) => assert!(message.contains("median")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(parse_aggregate("sum").is_err());
    assert!(parse_aggregate("sum:*").is_err());
    let (function, column) = parse_aggregate("count:*").expect("count star");
    assert!(function.is_count_star());
    assert_eq!(column, None);
}

#[test]
fn shared_state_scans_every_group_once() {
    let options = AggregateOptions::new()
        .num_partitions(4)
        .local_flush_threshold(8)
        .tuple_block_capacity(4)
        .scan_morsel_size(16);
    let shared = Arc::new(
        HashAggregateSharedState::new(
            1,
            0,
            vec![
                BuiltinAggregate::count_star().shared(),
                BuiltinAggregate::sum().shared(),
            ],
            options,
        )
        .expect("shared"),
    );

    for worker in 0..3 {
        let mut local = HashAggregateLocalState::new(Arc::clone(&shared)).expect("local");
        let keys: Vec<i64> = (0..50).map(|i| (i + worker) % 25).collect();
        let keys = ints(&keys);
        let ones = ValueVector::new(vec![Value::Int(1); 50], Arc::clone(keys.state()));
        let leading = Arc::clone(keys.state());
        local
            .append(
                &[],
                &[&keys],
                &[],
                &leading,
                &[AggregateInput::none(), AggregateInput::vector(&ones)],
                1,
            )
            .expect("append");
        local.finish().expect("finish");
    }

    match shared.scan_rows(0, 1) {
        Err(UmbralError::Invalid(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(shared.finalize_partitions().expect("finalize"), 4);
    assert_eq!(shared.num_rows(), 25);
    assert_eq!(shared.partition_sizes().iter().sum::<usize>(), 25);

    let mut rows = Vec::new();
    while let Some(range) = shared.get_next_range_to_read() {
        assert!(range.len() <= 16);
        rows.extend(shared.scan_rows(range.start, range.len()).expect("scan"));
    }
    assert_eq!(rows.len(), 25);
    for row in rows {
        assert_eq!(row[1], Value::Int(6), "row {row:?}");
        assert_eq!(row[2], Value::Int(6), "row {row:?}");
    }
}
