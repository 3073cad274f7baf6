use std::io;

use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, UmbralError>;

/// Errors surfaced by join planning and grouped aggregation.
///
/// Capacity and out-of-memory failures are user visible; the remaining
/// variants describe invariant violations that a well-formed query should
/// never reach.
#[derive(Debug, Error)]
pub enum UmbralError {
    /// The query declares more variables of one kind than a subgraph bitset can address.
    #[error("query too complex: more than {max} {kind} variables")]
    QueryTooComplex {
        /// Either `"node"` or `"relationship"`.
        kind: &'static str,
        /// Maximum number of variables of that kind.
        max: usize,
    },
    /// A node or relationship name was not bound in the query graph.
    #[error("unknown query variable '{name}'")]
    UnknownVariable {
        /// The unresolved variable name.
        name: String,
    },
    /// A relationship referenced an endpoint that was never added as a node.
    #[error("relationship '{rel}' references unknown node '{node}'")]
    UnknownEndpoint {
        /// Relationship variable name.
        rel: String,
        /// Missing endpoint name.
        node: String,
    },
    /// Join enumeration finished without a plan for the fully matched subgraph.
    #[error("no plan reaches the fully matched subgraph (nodes {nodes:#x}, rels {rels:#x})")]
    NoPlanForFullyMatched {
        /// Node bitset of the target subgraph.
        nodes: u64,
        /// Relationship bitset of the target subgraph.
        rels: u64,
    },
    /// Allocation failed or a configured memory budget was exceeded.
    #[error("out of memory in {context}: {requested} bytes requested")]
    OutOfMemory {
        /// Component that attempted to grow.
        context: &'static str,
        /// Size of the failed request in bytes.
        requested: usize,
    },
    /// API misuse detected at a public boundary.
    #[error("invalid operation: {0}")]
    Invalid(&'static str),
    /// API misuse with a dynamic description.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O failure while reading inputs.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// CSV decoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl UmbralError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            UmbralError::QueryTooComplex { .. } => "QueryTooComplex",
            UmbralError::UnknownVariable { .. } => "UnknownVariable",
            UmbralError::UnknownEndpoint { .. } => "UnknownEndpoint",
            UmbralError::NoPlanForFullyMatched { .. } => "NoPlanForFullyMatched",
            UmbralError::OutOfMemory { .. } => "OutOfMemory",
            UmbralError::Invalid(_) | UmbralError::InvalidArgument(_) => "Invalid",
            UmbralError::Config(_) => "Config",
            UmbralError::Io(_) => "Io",
            UmbralError::Csv(_) => "Csv",
        }
    }

    /// Returns `true` for errors a caller may report to the end user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            UmbralError::QueryTooComplex { .. }
                | UmbralError::OutOfMemory { .. }
                | UmbralError::Config(_)
                | UmbralError::Io(_)
                | UmbralError::Csv(_)
        )
    }
}

pub(crate) fn out_of_memory(context: &'static str, requested: usize) -> UmbralError {
    tracing::error!(context, requested, "allocation failed");
    UmbralError::OutOfMemory { context, requested }
}
