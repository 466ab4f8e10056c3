//! Cycle detection for directed graphs.

use crate::utils::graph::{NodeId, Successors};

/// Finds a cycle reachable from `start`.
///
/// The returned path is closed: its first and last node are the same. The search is
/// iterative, so deep dependency chains do not exhaust the stack.
pub fn find_cycle<G: Successors>(graph: &G, start: NodeId) -> Option<Vec<NodeId>> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return None;
    }

    let mut visited = vec![false; node_count];
    let mut on_path = vec![false; node_count];
    let mut path: Vec<NodeId> = Vec::new();
    let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

    visited[start.index()] = true;
    on_path[start.index()] = true;
    path.push(start);
    stack.push((start, graph.successors(start).collect::<Vec<_>>().into_iter().rev().collect()));

    while let Some((_, pending)) = stack.last_mut() {
        let Some(next) = pending.pop() else {
            stack.pop();
            if let Some(done) = path.pop() {
                on_path[done.index()] = false;
            }
            continue;
        };
        if next.index() >= node_count {
            continue;
        }
        if on_path[next.index()] {
            let begin = path.iter().position(|&n| n == next)?;
            let mut cycle = path[begin..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
        if visited[next.index()] {
            continue;
        }
        visited[next.index()] = true;
        on_path[next.index()] = true;
        path.push(next);
        let succs: Vec<NodeId> = graph.successors(next).collect();
        stack.push((next, succs.into_iter().rev().collect()));
    }

    None
}
