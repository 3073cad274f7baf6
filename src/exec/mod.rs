#![forbid(unsafe_code)]

//! Execution-time operators.

/// Partitioned hash aggregation.
pub mod aggregate;
