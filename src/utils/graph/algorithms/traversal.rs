//! Graph traversal algorithms.
//!
//! - [`postorder`] - Depth-first post-order, the iteration order of backward dataflow
//! - [`reverse_postorder`] - Reverse post-order, the iteration order of forward dataflow
//!
//! Both return vectors since the order requires the full traversal anyway.

use crate::utils::graph::{NodeId, Successors};

/// Depth-first post-order of the nodes reachable from `start`.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if succ.index() < node_count && !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Reverse post-order of the nodes reachable from `start`.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn diamond() -> DirectedGraph<&'static str> {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node("A");
        let b = graph.add_node("B");
        let c = graph.add_node("C");
        let d = graph.add_node("D");
        graph.add_edge(a, b).unwrap();
        graph.add_edge(a, c).unwrap();
        graph.add_edge(b, d).unwrap();
        graph.add_edge(c, d).unwrap();
        graph
    }

    #[test]
    fn orders_on_diamond() {
        let graph = diamond();
        let n = NodeId::new;
        assert_eq!(postorder(&graph, n(0)), vec![n(3), n(1), n(2), n(0)]);
        assert_eq!(reverse_postorder(&graph, n(0)), vec![n(0), n(2), n(1), n(3)]);
    }

    #[test]
    fn out_of_range_start() {
        let graph = diamond();
        assert!(postorder(&graph, NodeId::new(9)).is_empty());
    }
}
