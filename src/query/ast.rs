//! Pattern vocabulary shared by the query graph and logical plans.
//!
//! The binder hands over already-validated variables; these types only carry
//! names and directions, never expressions.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a binding (node or relationship) within the query.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Var(pub String);

impl Var {
    /// Returns the variable name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Var {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Var {
    fn from(value: &str) -> Self {
        Var(value.to_owned())
    }
}

impl From<String> for Var {
    fn from(value: String) -> Self {
        Var(value)
    }
}

/// Direction a relationship pattern was written with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// `(src)-[r]->(dst)`
    #[default]
    Out,
    /// `(src)<-[r]-(dst)`
    In,
    /// `(src)-[r]-(dst)`, either orientation matches.
    Both,
}

/// Direction an extend operator walks a relationship in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ExtendDirection {
    /// From the relationship's source node to its destination.
    Forward,
    /// From the destination back to the source.
    Backward,
    /// Undirected pattern; adjacency is read in both orientations.
    Both,
}

impl ExtendDirection {
    /// Direction used when walking a relationship declared with `edge` from
    /// its source side (`from_src = true`) or destination side.
    pub fn for_edge(edge: EdgeDirection, from_src: bool) -> Self {
        match (edge, from_src) {
            (EdgeDirection::Both, _) => ExtendDirection::Both,
            (EdgeDirection::Out, true) | (EdgeDirection::In, false) => ExtendDirection::Forward,
            (EdgeDirection::Out, false) | (EdgeDirection::In, true) => ExtendDirection::Backward,
        }
    }

    /// Lowercase label used in explain output.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtendDirection::Forward => "fwd",
            ExtendDirection::Backward => "bwd",
            ExtendDirection::Both => "both",
        }
    }
}
