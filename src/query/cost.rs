//! Cost estimates and candidate ordering for join enumeration.

use std::cmp::Ordering;

use crate::query::logical::LogicalPlan;

/// Multiplier applied to the build side of a hash join; building the hash
/// table is more expensive per row than probing it.
pub const BUILD_PENALTY: f64 = 2.0;

/// Total order over candidate plans for the same subgraph.
///
/// Implementations must be deterministic and total: two distinct plans may
/// only compare `Equal` if the choice between them does not matter.
pub trait PlanComparator: Send + Sync {
    /// Orders `a` before `b` when `a` is the better candidate.
    fn compare(&self, a: &LogicalPlan, b: &LogicalPlan) -> Ordering;
}

/// Default comparator: cheapest cost, then smallest cardinality, then plan hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct CostComparator;

impl PlanComparator for CostComparator {
    fn compare(&self, a: &LogicalPlan, b: &LogicalPlan) -> Ordering {
        a.cost
            .total_cmp(&b.cost)
            .then_with(|| a.cardinality.total_cmp(&b.cardinality))
            .then_with(|| a.plan_hash().cmp(&b.plan_hash()))
    }
}

/// Comparator that only looks at estimated output size; useful when the
/// caller re-costs plans itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct CardinalityComparator;

impl PlanComparator for CardinalityComparator {
    fn compare(&self, a: &LogicalPlan, b: &LogicalPlan) -> Ordering {
        a.cardinality
            .total_cmp(&b.cardinality)
            .then_with(|| a.plan_hash().cmp(&b.plan_hash()))
    }
}

pub(crate) fn extend_cost(input: &LogicalPlan, output_cardinality: f64) -> f64 {
    input.cost + output_cardinality
}

pub(crate) fn hash_join_cost(probe: &LogicalPlan, build: &LogicalPlan) -> f64 {
    probe.cost + build.cost + probe.cardinality + BUILD_PENALTY * build.cardinality
}

pub(crate) fn hash_join_cardinality(
    probe: &LogicalPlan,
    build: &LogicalPlan,
    join_node_count: f64,
) -> f64 {
    probe.cardinality * build.cardinality / join_node_count.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Var;
    use crate::query::logical::{LogicalOp, PlanNode};

    fn plan(var: &str, cardinality: f64, cost: f64) -> LogicalPlan {
        LogicalPlan::new(
            PlanNode::new(LogicalOp::ScanNode {
                var: Var::from(var),
                labels: Vec::new(),
            }),
            cardinality,
            cost,
        )
    }

    #[test]
    fn cost_then_cardinality_then_hash() {
        let cmp = CostComparator;
        assert_eq!(cmp.compare(&plan("a", 5.0, 1.0), &plan("a", 1.0, 2.0)), Ordering::Less);
        assert_eq!(cmp.compare(&plan("a", 1.0, 2.0), &plan("a", 5.0, 2.0)), Ordering::Less);
        let x = plan("x", 1.0, 1.0);
        let y = plan("y", 1.0, 1.0);
        assert_ne!(cmp.compare(&x, &y), Ordering::Equal);
        assert_eq!(cmp.compare(&x, &y), cmp.compare(&y, &x).reverse());
    }

    #[test]
    fn build_side_is_penalised() {
        let small = plan("a", 10.0, 10.0);
        let large = plan("b", 1_000.0, 1_000.0);
        assert!(hash_join_cost(&large, &small) < hash_join_cost(&small, &large));
    }
}
