#![forbid(unsafe_code)]

//! Join-order planning for graph pattern queries.
//!
//! A pattern is lowered into a [`QueryGraph`], whose node and relationship
//! variables are addressed by position. The [`JoinOrderEnumerator`] sweeps
//! bitset [`Subgraph`]s of that graph bottom-up and records candidate
//! [`LogicalPlan`]s in a [`SubplanTable`].

/// Variables and edge directions shared by the planner types.
pub mod ast;

/// Cost formulas and candidate comparators.
pub mod cost;

/// Dynamic-programming join-order enumerator.
///
/// Combines extend moves with single-join-node hash joins and ranks
/// candidates per subgraph.
pub mod enumerator;

/// Query graphs and graph collections.
pub mod graph;

/// Logical plan trees and their explain output.
pub mod logical;

/// Cardinality statistics used by the cost model.
pub mod metadata;

/// WHERE-clause conjuncts and filter placement.
pub mod predicate;

/// Bitset subgraphs over a query graph.
pub mod subgraph;

/// Plan memo keyed by subgraph.
pub mod subplans;

/// Dynamically typed values for grouping keys and aggregate inputs.
pub mod value;

pub use ast::{EdgeDirection, ExtendDirection, Var};
pub use cost::{CardinalityComparator, CostComparator, PlanComparator};
pub use enumerator::{EnumeratorOutput, JoinOrderEnumerator, PlannerConfig, QueryPart};
pub use graph::{QueryGraph, QueryGraphCollection, QueryNode, QueryRel};
pub use logical::{LogicalOp, LogicalPlan, PlanExplain, PlanNode};
pub use metadata::{InMemoryStatistics, StatisticsProvider};
pub use predicate::Predicate;
pub use subgraph::{Subgraph, MAX_QUERY_VARIABLES};
pub use subplans::SubplanTable;
pub use value::Value;
