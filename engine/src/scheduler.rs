//! FILENAME: engine/src/scheduler.rs
//! PURPOSE: C9 — given an edited cell, linearizes every transitive
//! dependent into a valid topological order so each one is recomputed
//! after all of its own inputs.
//! CONTEXT: Assumes C7 has already ruled out a cycle in the affected
//! subgraph; the scheduler itself still guards against one defensively
//! (a cell whose in-degree never reaches zero is simply omitted, never
//! looped on) since a missed cycle would otherwise hang the caller.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cell::CellKey;
use crate::dependency_graph::DependencyGraph;

/// Returns the cells transitively depending on `edited` (not including
/// `edited` itself), in an order where every cell appears after all of its
/// in-subgraph parents. Uses Kahn's algorithm with an explicit queue —
/// iterative, so depth is bounded only by the subgraph size.
pub fn topological_order(graph: &DependencyGraph, edited: CellKey) -> Vec<CellKey> {
    let affected = graph.transitive_children(edited);
    if affected.is_empty() {
        return Vec::new();
    }

    let mut in_degree: HashMap<CellKey, usize> = HashMap::new();
    for &cell in &affected {
        let degree = graph
            .parents_of(cell)
            .into_iter()
            .filter(|p| affected.contains(p) || *p == edited)
            .count();
        in_degree.insert(cell, degree);
    }

    let mut queue: VecDeque<CellKey> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&cell, _)| cell)
        .collect();

    let mut order = Vec::with_capacity(affected.len());
    let mut emitted: HashSet<CellKey> = HashSet::new();

    while let Some(cell) = queue.pop_front() {
        if !emitted.insert(cell) {
            continue;
        }
        order.push(cell);
        for child in graph.children_of(cell) {
            if let Some(degree) = in_degree.get_mut(&child) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    order
}
