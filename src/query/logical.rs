//! Logical join plans produced by join-order enumeration.
//!
//! Plans are skeletons: they record which scans, extends and hash joins were
//! chosen and in which order, annotated with cardinality and cost estimates.
//! Subtrees are shared between candidates through [`Arc`].

use std::hash::Hasher;
use std::sync::Arc;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::ast::{ExtendDirection, Var};

/// Logical operator tree with estimates.
#[derive(Clone, Debug)]
pub struct LogicalPlan {
    /// The root node of the logical plan tree.
    pub root: Arc<PlanNode>,
    /// Estimated number of output rows.
    pub cardinality: f64,
    /// Estimated cumulative cost.
    pub cost: f64,
    plan_hash: u64,
}

impl LogicalPlan {
    /// Creates a plan and computes its structural hash.
    pub fn new(root: PlanNode, cardinality: f64, cost: f64) -> Self {
        let plan_hash = hash_plan_node(&root);
        Self {
            root: Arc::new(root),
            cardinality,
            cost,
            plan_hash,
        }
    }

    /// Deterministic structural hash; equal trees hash equally across runs.
    pub fn plan_hash(&self) -> u64 {
        self.plan_hash
    }

    /// Human-readable explain tree.
    pub fn explain(&self) -> PlanExplain {
        PlanExplain {
            root: build_explain_tree(&self.root),
            plan_hash: self.plan_hash,
            cardinality: self.cardinality,
            cost: self.cost,
        }
    }

    /// Number of hash joins in the plan.
    pub fn num_hash_joins(&self) -> usize {
        self.root.count_ops(&|op| matches!(op, LogicalOp::HashJoin { .. }))
    }

    /// Number of filters in the plan.
    pub fn num_filters(&self) -> usize {
        self.root.count_ops(&|op| matches!(op, LogicalOp::Filter { .. }))
    }
}

/// Node within the logical plan tree.
#[derive(Clone, Debug)]
pub struct PlanNode {
    /// The logical operator at this node.
    pub op: LogicalOp,
    /// Child nodes that provide input to this operator.
    pub inputs: Vec<Arc<PlanNode>>,
}

impl PlanNode {
    /// Creates a new plan node with no inputs.
    pub fn new(op: LogicalOp) -> Self {
        Self {
            op,
            inputs: Vec::new(),
        }
    }

    /// Creates a new plan node with the given inputs.
    pub fn with_inputs(op: LogicalOp, inputs: Vec<Arc<PlanNode>>) -> Self {
        Self { op, inputs }
    }

    fn count_ops(&self, pred: &dyn Fn(&LogicalOp) -> bool) -> usize {
        usize::from(pred(&self.op))
            + self
                .inputs
                .iter()
                .map(|child| child.count_ops(pred))
                .sum::<usize>()
    }
}

/// Logical operators emitted by the enumerator.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalOp {
    /// Scans all nodes bound to a variable.
    ScanNode {
        /// Node variable.
        var: Var,
        /// Label constraint of the variable.
        labels: Vec<String>,
    },
    /// Scans a relationship table, binding both endpoints.
    ScanRel {
        /// Relationship variable.
        rel: Var,
        /// Endpoint bound first.
        from: Var,
        /// Endpoint bound second.
        to: Var,
        /// Direction relative to the relationship's declared source.
        direction: ExtendDirection,
    },
    /// Extends bound rows across one relationship.
    Extend {
        /// Already-bound endpoint.
        from: Var,
        /// Endpoint reached by the extend.
        to: Var,
        /// Relationship variable.
        rel: Var,
        /// Direction relative to the relationship's declared source.
        direction: ExtendDirection,
        /// `true` when `to` is already bound and the extend only checks adjacency.
        closing: bool,
    },
    /// Hash join of a probe input (first) and a build input (second).
    HashJoin {
        /// Node variable shared by both inputs.
        join_node: Var,
    },
    /// Applies a predicate conjunct.
    Filter {
        /// Predicate identifier.
        predicate: String,
    },
}

/// Human-readable explain tree.
#[derive(Clone, Debug, Serialize)]
pub struct PlanExplain {
    /// Root node of the explain tree.
    pub root: ExplainNode,
    /// Deterministic hash for the plan.
    pub plan_hash: u64,
    /// Estimated output rows.
    pub cardinality: f64,
    /// Estimated cost.
    pub cost: f64,
}

impl PlanExplain {
    /// Renders the tree with two-space indentation per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, &mut out);
        out
    }
}

/// Explain node representing an operator with its properties.
#[derive(Clone, Debug, Serialize)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Additional properties describing the operator.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given operator name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
}

impl ExplainProp {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

fn op_name(op: &LogicalOp) -> &'static str {
    match op {
        LogicalOp::ScanNode { .. } => "ScanNode",
        LogicalOp::ScanRel { .. } => "ScanRel",
        LogicalOp::Extend { .. } => "Extend",
        LogicalOp::HashJoin { .. } => "HashJoin",
        LogicalOp::Filter { .. } => "Filter",
    }
}

fn op_props(op: &LogicalOp) -> Vec<ExplainProp> {
    match op {
        LogicalOp::ScanNode { var, labels } => {
            let mut props = vec![ExplainProp::new("var", var.as_str())];
            if !labels.is_empty() {
                props.push(ExplainProp::new("labels", labels.join("|")));
            }
            props
        }
        LogicalOp::ScanRel {
            rel,
            from,
            to,
            direction,
        } => vec![
            ExplainProp::new("rel", rel.as_str()),
            ExplainProp::new("from", from.as_str()),
            ExplainProp::new("to", to.as_str()),
            ExplainProp::new("direction", direction.as_str()),
        ],
        LogicalOp::Extend {
            from,
            to,
            rel,
            direction,
            closing,
        } => {
            let mut props = vec![
                ExplainProp::new("from", from.as_str()),
                ExplainProp::new("rel", rel.as_str()),
                ExplainProp::new("to", to.as_str()),
                ExplainProp::new("direction", direction.as_str()),
            ];
            if *closing {
                props.push(ExplainProp::new("closing", "true"));
            }
            props
        }
        LogicalOp::HashJoin { join_node } => vec![ExplainProp::new("on", join_node.as_str())],
        LogicalOp::Filter { predicate } => vec![ExplainProp::new("predicate", predicate.clone())],
    }
}

fn build_explain_tree(node: &PlanNode) -> ExplainNode {
    let mut explain = ExplainNode::new(op_name(&node.op));
    explain.props = op_props(&node.op);
    explain.inputs = node
        .inputs
        .iter()
        .map(|child| build_explain_tree(child))
        .collect();
    explain
}

fn render_node(node: &ExplainNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.op);
    if !node.props.is_empty() {
        let props: Vec<String> = node
            .props
            .iter()
            .map(|p| format!("{}={}", p.key, p.value))
            .collect();
        out.push_str(" [");
        out.push_str(&props.join(", "));
        out.push(']');
    }
    out.push('\n');
    for child in &node.inputs {
        render_node(child, depth + 1, out);
    }
}

fn hash_plan_node(node: &PlanNode) -> u64 {
    let mut hasher = Xxh64::new(0);
    write_plan_node(node, &mut hasher);
    hasher.finish()
}

fn write_plan_node(node: &PlanNode, hasher: &mut Xxh64) {
    hasher.write(op_name(&node.op).as_bytes());
    for prop in op_props(&node.op) {
        hasher.write(prop.key.as_bytes());
        hasher.write_u8(0);
        hasher.write(prop.value.as_bytes());
        hasher.write_u8(0);
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        write_plan_node(child, hasher);
    }
}
