//! Join-order planning and parallel grouped aggregation for graph queries.
//!
//! The [`query`] module turns a pattern into a query graph and searches join
//! orders with dynamic programming over bitset subgraphs. The [`exec`] module
//! implements partitioned hash aggregation for concurrent producers.

#![warn(missing_docs)]

/// Error types shared across the crate.
pub mod error;
/// Execution-time operators.
pub mod exec;
/// Env-gated profiling counters.
pub mod profile;
/// Join-order planning.
pub mod query;

pub use error::{Result, UmbralError};
