#![forbid(unsafe_code)]

//! Grouped aggregation.
//!
//! Each worker folds its input into a private [`AggregateHashTable`] through a
//! [`HashAggregateLocalState`]. Full groups move into the partitions of a
//! [`HashAggregateSharedState`], which merges every partition exactly once and
//! then serves the result through a morsel-driven scan.

/// Slot directory and vectorized key hashing.
pub mod base;

/// Factorized row storage for groups.
pub mod factorized;

/// Aggregate functions and states.
pub mod function;

/// Key hashing.
pub mod hash;

/// Linear-probing aggregate hash table.
pub mod hash_table;

/// Aggregation tuning options.
pub mod options;

/// Partitioned shared state and per-worker local state.
pub mod shared;

/// Tuple blocks and the partition append queue.
pub mod tuple_block;

/// Value vectors and chunk states.
pub mod vector;

pub use base::{BaseHashTable, HashSlot};
pub use factorized::{EntryId, FactorizedRow, FactorizedTable};
pub use function::{
    parse_aggregate, AggregateFunction, AggregateKind, AggregateState, BuiltinAggregate, Numeric,
};
pub use hash_table::{AggregateHashTable, AggregateInput, OwnedEntry};
pub use options::AggregateOptions;
pub use shared::{HashAggregateLocalState, HashAggregateSharedState};
pub use tuple_block::{TupleBlock, TupleBlockQueue};
pub use vector::{DataChunkState, ValueVector};
