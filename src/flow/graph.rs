//! Node arena of a compiled flow.

use crate::strategy::Strategy;
use std::fmt;

/// Handle of a node in a [`FlowGraph`].
pub type NodeId = usize;

/// Behavior of a node.
pub enum NodeKind {
    /// Runs its children once, in order.
    Sequence,
    /// Runs a bound strategy.
    Leaf(Box<dyn Strategy>),
    /// Block-coordinate sweep.
    Bcd,
    /// Runs its children `n` times.
    Repeat { n: usize },
    /// Runs its children until `patience` consecutive executions bring no
    /// strict improvement, or `max_iters` executions.
    UntilNoImprove {
        patience: usize,
        max_iters: Option<usize>,
    },
    /// Runs its children when `u ~ U[0, 1)` falls below `p`.
    WithProbability { p: f64 },
    /// Runs its children on every `k`-th visit. `visits` persists across
    /// generations.
    EveryK { k: usize, visits: u64 },
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Sequence => f.write_str("Sequence"),
            NodeKind::Leaf(s) => write!(f, "Leaf({})", s.name()),
            NodeKind::Bcd => f.write_str("Bcd"),
            NodeKind::Repeat { n } => write!(f, "Repeat({n})"),
            NodeKind::UntilNoImprove {
                patience,
                max_iters,
            } => write!(f, "UntilNoImprove({patience}, {max_iters:?})"),
            NodeKind::WithProbability { p } => write!(f, "WithProbability({p})"),
            NodeKind::EveryK { k, visits } => write!(f, "EveryK({k}, visits={visits})"),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
}

/// Arena holding every node of a compiled program.
///
/// Built once by the compiler and never restructured; only node state
/// (strategy internals, visit counters) changes during a run.
#[derive(Debug, Default)]
pub struct FlowGraph {
    nodes: Vec<Node>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Calls [`Strategy::reset`] on every leaf.
    pub fn reset_strategies(&mut self) {
        for node in &mut self.nodes {
            if let NodeKind::Leaf(strategy) = &mut node.kind {
                strategy.reset();
            }
        }
    }

    /// Number of strategy leaves.
    pub fn count_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Leaf(_)))
            .count()
    }
}
