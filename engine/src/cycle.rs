//! FILENAME: engine/src/cycle.rs
//! PURPOSE: C7 — decides whether an edited cell participates in a directed
//! cycle, restricted to the subgraph reachable from it in either direction.
//! CONTEXT: Runs Kosaraju's algorithm (two passes over an explicit stack,
//! no host-language recursion — depth is bounded only by workbook size).

use std::collections::{HashMap, HashSet};

use crate::cell::CellKey;
use crate::dependency_graph::DependencyGraph;

/// Explores `start`'s reachable subgraph (parents and children, closed
/// under both directions) and returns every strongly connected component
/// of size > 1 found within it — i.e. every cycle touching `start`,
/// directly or transitively.
pub fn detect_cycles(graph: &DependencyGraph, start: CellKey) -> Vec<Vec<CellKey>> {
    let nodes = reachable_subgraph(graph, start);
    if nodes.is_empty() {
        return Vec::new();
    }
    kosaraju(graph, &nodes)
        .into_iter()
        .filter(|scc| scc.len() > 1 || is_self_loop(graph, scc[0]))
        .collect()
}

/// A lone node is still a cycle if it lists itself as its own parent.
fn is_self_loop(graph: &DependencyGraph, node: CellKey) -> bool {
    graph.parents_of(node).contains(&node)
}

/// The undirected closure of everything reachable from `start` by
/// following parent or child edges, including `start` itself.
fn reachable_subgraph(graph: &DependencyGraph, start: CellKey) -> HashSet<CellKey> {
    let mut nodes = HashSet::new();
    nodes.insert(start);
    nodes.extend(graph.transitive_parents(start));
    nodes.extend(graph.transitive_children(start));
    nodes
}

/// Kosaraju's algorithm restricted to `nodes`: a first DFS computes a
/// finish-order over the forward graph (children edges), then a second
/// DFS over the reverse graph (parent edges) in reverse finish order
/// peels off one SCC per root. Both passes are iterative.
fn kosaraju(graph: &DependencyGraph, nodes: &HashSet<CellKey>) -> Vec<Vec<CellKey>> {
    let finish_order = forward_finish_order(graph, nodes);

    let mut visited: HashSet<CellKey> = HashSet::new();
    let mut sccs = Vec::new();

    for &node in finish_order.iter().rev() {
        if visited.contains(&node) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            component.push(current);
            for parent in graph.parents_of(current) {
                if nodes.contains(&parent) && !visited.contains(&parent) {
                    stack.push(parent);
                }
            }
        }
        sccs.push(component);
    }

    sccs
}

/// Iterative post-order DFS over the forward (children) graph, restricted
/// to `nodes`. Returns nodes in the order they finished.
fn forward_finish_order(graph: &DependencyGraph, nodes: &HashSet<CellKey>) -> Vec<CellKey> {
    let mut visited: HashSet<CellKey> = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());

    for &root in nodes {
        if visited.contains(&root) {
            continue;
        }
        // Explicit-stack post-order: each frame is (node, remaining children
        // still to push). `pushed` tracks whether the node's children have
        // already been queued, so a node is only emitted once all of its
        // descendants have been.
        let mut stack: Vec<(CellKey, bool)> = vec![(root, false)];
        while let Some((node, children_pushed)) = stack.pop() {
            if children_pushed {
                order.push(node);
                continue;
            }
            if !visited.insert(node) {
                continue;
            }
            stack.push((node, true));
            for child in graph.children_of(node) {
                if nodes.contains(&child) && !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CellCoord;

    fn key(col: u32, row: u32) -> CellKey {
        CellKey::new(0, CellCoord::new(col, row))
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let a1 = key(1, 1);
        graph.adopt_edges(a1, [a1].into_iter().collect());

        let sccs = detect_cycles(&graph, a1);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0], vec![a1]);
    }

    #[test]
    fn three_cell_cycle_detected() {
        let mut graph = DependencyGraph::new();
        let a1 = key(1, 1);
        let b1 = key(2, 1);
        let c1 = key(3, 1);
        // A1 = B1, B1 = C1 + 1, C1 = A1 + 2
        graph.adopt_edges(a1, [b1].into_iter().collect());
        graph.adopt_edges(b1, [c1].into_iter().collect());
        graph.adopt_edges(c1, [a1].into_iter().collect());

        let sccs = detect_cycles(&graph, a1);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 3);
    }

    #[test]
    fn downstream_cell_sees_the_cycle_as_reachable() {
        let mut graph = DependencyGraph::new();
        let a1 = key(1, 1);
        let b1 = key(2, 1);
        let c1 = key(3, 1);
        let d1 = key(4, 1);
        graph.adopt_edges(a1, [b1].into_iter().collect());
        graph.adopt_edges(b1, [c1].into_iter().collect());
        graph.adopt_edges(c1, [a1].into_iter().collect());
        graph.adopt_edges(d1, [b1].into_iter().collect());

        let sccs = detect_cycles(&graph, d1);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 3);
    }

    #[test]
    fn acyclic_chain_has_no_sccs() {
        let mut graph = DependencyGraph::new();
        let a1 = key(1, 1);
        let b1 = key(2, 1);
        graph.adopt_edges(b1, [a1].into_iter().collect());

        assert!(detect_cycles(&graph, b1).is_empty());
    }

    #[test]
    fn diamond_shape_has_no_sccs() {
        let mut graph = DependencyGraph::new();
        let a1 = key(1, 1);
        let b1 = key(2, 1);
        let c1 = key(3, 1);
        let d1 = key(4, 1);
        graph.adopt_edges(b1, [a1].into_iter().collect());
        graph.adopt_edges(c1, [a1].into_iter().collect());
        graph.adopt_edges(d1, [b1, c1].into_iter().collect());

        assert!(detect_cycles(&graph, a1).is_empty());
    }
}
