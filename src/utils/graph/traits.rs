//! Trait definitions for graph abstractions.
//!
//! Algorithms in [`crate::utils::graph::algorithms`] and the dataflow solver are written
//! against these traits, so they run unchanged on [`crate::cfg::ControlFlowGraph`] and on
//! the plain [`crate::utils::graph::DirectedGraph`].
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - outgoing adjacency
//! - [`Predecessors`] - incoming adjacency
//! - [`RootedGraph`] - graphs with a designated entry node

use crate::utils::graph::NodeId;

/// Core properties of a graph.
pub trait GraphBase {
    /// Upper bound (exclusive) of node indices. Graphs with removed nodes may report
    /// indices that are no longer live; [`GraphBase::node_ids`] only yields live ones.
    fn node_count(&self) -> usize;

    /// Iterates the live node ids.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Forward adjacency.
pub trait Successors: GraphBase {
    /// Iterates the targets of the outgoing edges of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward adjacency.
pub trait Predecessors: GraphBase {
    /// Iterates the sources of the incoming edges of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with a single entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// The entry node.
    fn entry(&self) -> NodeId;
}
