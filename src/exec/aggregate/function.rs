//! Aggregate functions and their per-group states.
//!
//! Every function follows the same three-step contract: `init_state` yields
//! the identity state, `update` folds one input (with a multiplicity) into it,
//! and `combine` merges two partial states. `combine` must be commutative and
//! associative so partial tables can be merged in any order.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::error::{Result, UmbralError};
use crate::query::value::Value;

/// Running numeric sum. Integer inputs accumulate in 128 bits so the result
/// does not depend on the order rows arrive in; the sum only turns into a
/// float once it leaves the `i128` range or a float input is seen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Numeric {
    /// Exact integer sum.
    Int(i128),
    /// Floating point sum.
    Float(f64),
}

impl Numeric {
    fn add(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => match a.checked_add(b) {
                Some(sum) => Numeric::Int(sum),
                None => Numeric::Float(a as f64 + b as f64),
            },
            (a, b) => Numeric::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn scaled(self, multiplicity: u64) -> Numeric {
        match self {
            Numeric::Int(v) => match v.checked_mul(i128::from(multiplicity)) {
                Some(product) => Numeric::Int(product),
                None => Numeric::Float(v as f64 * multiplicity as f64),
            },
            Numeric::Float(v) => Numeric::Float(v * multiplicity as f64),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(v) => v as f64,
            Numeric::Float(v) => v,
        }
    }

    fn from_value(value: &Value) -> Option<Numeric> {
        match value {
            Value::Int(v) => Some(Numeric::Int(i128::from(*v))),
            Value::Float(v) => Some(Numeric::Float(*v)),
            _ => None,
        }
    }

    /// Output value: `Int` when the sum fits in an `i64`, `Float` otherwise.
    fn to_value(self) -> Value {
        match self {
            Numeric::Int(v) => i64::try_from(v).map_or(Value::Float(v as f64), Value::Int),
            Numeric::Float(v) => Value::Float(v),
        }
    }
}

/// Per-group aggregate state. Owned by the table row that holds it and
/// moved, never cloned, when rows migrate between tables.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateState {
    /// Row or value count.
    Count(u64),
    /// Running sum; `None` until a non-NULL numeric input arrives.
    Sum(Option<Numeric>),
    /// Running sum and count for AVG.
    Avg {
        /// Sum of inputs.
        sum: f64,
        /// Number of inputs.
        count: u64,
    },
    /// Current minimum or maximum.
    Extreme(Option<Value>),
    /// Collected values.
    Collect(Vec<Value>),
}

/// Aggregate function contract.
pub trait AggregateFunction: Send + Sync + fmt::Debug {
    /// Display name, e.g. `sum` or `count_distinct`.
    fn name(&self) -> &str;

    /// `true` if duplicate input values within a group are ignored.
    fn is_distinct(&self) -> bool;

    /// `true` if the function consumes no input column.
    fn is_count_star(&self) -> bool {
        false
    }

    /// Identity state for a new group.
    fn init_state(&self) -> AggregateState;

    /// Folds `input` into `state` as if it occurred `multiplicity` times.
    /// `None` stands for the absent input of `COUNT(*)`.
    fn update(&self, state: &mut AggregateState, input: Option<&Value>, multiplicity: u64);

    /// Merges a partial state into `state`.
    fn combine(&self, state: &mut AggregateState, other: AggregateState);

    /// Output value of a final state.
    fn finalize(&self, state: &AggregateState) -> Value;

    /// Approximate in-row size of the state, for memory accounting.
    fn state_size(&self) -> usize {
        mem::size_of::<AggregateState>()
    }
}

/// Built-in aggregate kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    /// `COUNT(*)`.
    CountStar,
    /// `COUNT(x)`.
    Count,
    /// `SUM(x)`.
    Sum,
    /// `AVG(x)`.
    Avg,
    /// `MIN(x)`.
    Min,
    /// `MAX(x)`.
    Max,
    /// `COLLECT(x)`.
    Collect,
}

impl AggregateKind {
    fn as_str(self) -> &'static str {
        match self {
            AggregateKind::CountStar => "count_star",
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Collect => "collect",
        }
    }
}

/// Built-in aggregate function.
#[derive(Clone, Debug)]
pub struct BuiltinAggregate {
    kind: AggregateKind,
    distinct: bool,
    name: String,
}

impl BuiltinAggregate {
    /// Non-distinct instance of `kind`.
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            distinct: false,
            name: kind.as_str().to_owned(),
        }
    }

    /// `COUNT(*)`.
    pub fn count_star() -> Self {
        Self::new(AggregateKind::CountStar)
    }

    /// `COUNT(x)`.
    pub fn count() -> Self {
        Self::new(AggregateKind::Count)
    }

    /// `SUM(x)`.
    pub fn sum() -> Self {
        Self::new(AggregateKind::Sum)
    }

    /// `AVG(x)`.
    pub fn avg() -> Self {
        Self::new(AggregateKind::Avg)
    }

    /// `MIN(x)`.
    pub fn min() -> Self {
        Self::new(AggregateKind::Min)
    }

    /// `MAX(x)`.
    pub fn max() -> Self {
        Self::new(AggregateKind::Max)
    }

    /// `COLLECT(x)`.
    pub fn collect() -> Self {
        Self::new(AggregateKind::Collect)
    }

    /// DISTINCT variant. `COUNT(*)` has none and is returned unchanged.
    pub fn distinct(mut self) -> Self {
        if self.kind != AggregateKind::CountStar {
            self.distinct = true;
            self.name = format!("{}_distinct", self.kind.as_str());
        }
        self
    }

    /// Function kind.
    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// Wraps the function for use in a table definition.
    pub fn shared(self) -> Arc<dyn AggregateFunction> {
        Arc::new(self)
    }
}

impl AggregateFunction for BuiltinAggregate {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }

    fn is_count_star(&self) -> bool {
        self.kind == AggregateKind::CountStar
    }

    fn init_state(&self) -> AggregateState {
        match self.kind {
            AggregateKind::CountStar | AggregateKind::Count => AggregateState::Count(0),
            AggregateKind::Sum => AggregateState::Sum(None),
            AggregateKind::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateKind::Min | AggregateKind::Max => AggregateState::Extreme(None),
            AggregateKind::Collect => AggregateState::Collect(Vec::new()),
        }
    }

    fn update(&self, state: &mut AggregateState, input: Option<&Value>, multiplicity: u64) {
        if self.kind == AggregateKind::CountStar {
            if let AggregateState::Count(count) = state {
                *count = count.saturating_add(multiplicity);
            }
            return;
        }
        let Some(value) = input.filter(|v| !v.is_null()) else {
            return;
        };
        match (self.kind, state) {
            (AggregateKind::Count, AggregateState::Count(count)) => {
                *count = count.saturating_add(multiplicity);
            }
            (AggregateKind::Sum, AggregateState::Sum(sum)) => {
                if let Some(numeric) = Numeric::from_value(value) {
                    let addend = numeric.scaled(multiplicity);
                    *sum = Some(match *sum {
                        Some(acc) => acc.add(addend),
                        None => addend,
                    });
                }
            }
            (AggregateKind::Avg, AggregateState::Avg { sum, count }) => {
                if let Some(v) = value.as_f64() {
                    *sum += v * multiplicity as f64;
                    *count = count.saturating_add(multiplicity);
                }
            }
            // MIN and MAX are insensitive to multiplicity.
            (AggregateKind::Min, AggregateState::Extreme(current)) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c).is_lt()) {
                    *current = Some(value.clone());
                }
            }
            (AggregateKind::Max, AggregateState::Extreme(current)) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c).is_gt()) {
                    *current = Some(value.clone());
                }
            }
            (AggregateKind::Collect, AggregateState::Collect(values)) => {
                for _ in 0..multiplicity {
                    values.push(value.clone());
                }
            }
            (kind, state) => debug_assert!(false, "{kind:?} cannot update {state:?}"),
        }
    }

    fn combine(&self, state: &mut AggregateState, other: AggregateState) {
        match (state, other) {
            (AggregateState::Count(a), AggregateState::Count(b)) => *a = a.saturating_add(b),
            (AggregateState::Sum(a), AggregateState::Sum(b)) => {
                *a = match (*a, b) {
                    (Some(x), Some(y)) => Some(x.add(y)),
                    (x, y) => x.or(y),
                };
            }
            (
                AggregateState::Avg { sum, count },
                AggregateState::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count = count.saturating_add(other_count);
            }
            (AggregateState::Extreme(current), AggregateState::Extreme(Some(candidate))) => {
                let replace = match current.as_ref() {
                    None => true,
                    Some(c) if self.kind == AggregateKind::Min => candidate.total_cmp(c).is_lt(),
                    Some(c) => candidate.total_cmp(c).is_gt(),
                };
                if replace {
                    *current = Some(candidate);
                }
            }
            (AggregateState::Extreme(_), AggregateState::Extreme(None)) => {}
            (AggregateState::Collect(values), AggregateState::Collect(mut other)) => {
                values.append(&mut other);
            }
            (state, other) => debug_assert!(false, "cannot combine {state:?} with {other:?}"),
        }
    }

    fn finalize(&self, state: &AggregateState) -> Value {
        match state {
            AggregateState::Count(count) => Value::Int(i64::try_from(*count).unwrap_or(i64::MAX)),
            AggregateState::Sum(None) => Value::Null,
            AggregateState::Sum(Some(sum)) => sum.to_value(),
            AggregateState::Avg { count: 0, .. } => Value::Null,
            AggregateState::Avg { sum, count } => Value::Float(sum / *count as f64),
            AggregateState::Extreme(value) => value.clone().unwrap_or(Value::Null),
            AggregateState::Collect(values) => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                Value::String(format!("[{}]", rendered.join(", ")))
            }
        }
    }
}

/// Parses `name:column` aggregate specs such as `count:*`, `sum:price` or
/// `count_distinct:city`. Returns the function and its input column, which
/// is `None` for `count:*`.
pub fn parse_aggregate(spec: &str) -> Result<(Arc<dyn AggregateFunction>, Option<String>)> {
    let (name, column) = spec
        .split_once(':')
        .ok_or_else(|| UmbralError::InvalidArgument(format!("aggregate '{spec}' must be name:column")))?;
    let name = name.trim().to_ascii_lowercase();
    let column = column.trim();
    if name == "count" && column == "*" {
        return Ok((BuiltinAggregate::count_star().shared(), None));
    }
    if column.is_empty() || column == "*" {
        return Err(UmbralError::InvalidArgument(format!(
            "aggregate '{spec}' needs an input column"
        )));
    }
    let (base, distinct) = match name.strip_suffix("_distinct") {
        Some(base) => (base, true),
        None => (name.as_str(), false),
    };
    let function = match base {
        "count" => BuiltinAggregate::count(),
        "sum" => BuiltinAggregate::sum(),
        "avg" => BuiltinAggregate::avg(),
        "min" => BuiltinAggregate::min(),
        "max" => BuiltinAggregate::max(),
        "collect" => BuiltinAggregate::collect(),
        other => {
            return Err(UmbralError::InvalidArgument(format!(
                "unknown aggregate function '{other}'"
            )))
        }
    };
    let function = if distinct { function.distinct() } else { function };
    Ok((function.shared(), Some(column.to_owned())))
}
