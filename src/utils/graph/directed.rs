//! Adjacency-list directed graph with node payloads.

use crate::{
    utils::graph::{
        node::NodeId,
        traits::{GraphBase, Predecessors, Successors},
    },
    Result,
};

/// A directed graph whose nodes carry data of type `N`.
///
/// Nodes are never removed, so node ids stay dense. Parallel edges are allowed.
#[derive(Debug, Clone)]
pub struct DirectedGraph<N> {
    nodes: Vec<N>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
    edge_count: usize,
}

impl<N> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DirectedGraph<N> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        DirectedGraph {
            nodes: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            edge_count: 0,
        }
    }

    /// Adds a node and returns its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge `source -> target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if either endpoint does not exist.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) -> Result<()> {
        if source.index() >= self.nodes.len() || target.index() >= self.nodes.len() {
            return Err(out_of_bounds_error!());
        }
        self.outgoing[source.index()].push(target);
        self.incoming[target.index()].push(source);
        self.edge_count += 1;
        Ok(())
    }

    /// Returns `true` if an edge `source -> target` exists.
    #[must_use]
    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.outgoing
            .get(source.index())
            .is_some_and(|out| out.contains(&target))
    }

    /// The payload of `node`.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Iterates `(id, payload)` pairs.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, data)| (NodeId::new(i), data))
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}

impl<N> GraphBase for DirectedGraph<N> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }
}

impl<N> Successors for DirectedGraph<N> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flat_map(|out| out.iter().copied())
    }
}

impl<N> Predecessors for DirectedGraph<N> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming
            .get(node.index())
            .into_iter()
            .flat_map(|inc| inc.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency() -> crate::Result<()> {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        graph.add_edge(a, b)?;
        graph.add_edge(a, b)?;

        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge(a, b));
        assert!(!graph.has_edge(b, a));
        assert_eq!(graph.predecessors(b).collect::<Vec<_>>(), vec![a, a]);
        assert_eq!(graph.node(b), Some(&"b"));
        assert!(graph.add_edge(a, NodeId::new(7)).is_err());
        Ok(())
    }
}
