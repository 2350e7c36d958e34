//! FILENAME: engine/src/dependency_graph.rs
//! PURPOSE: C6 — directed edges between cells: *cell -> cells it depends
//! on* (parents) and the reverse (children), keyed globally across sheets.
//! CONTEXT: Cycle detection (C7) and the update scheduler (C9) both query
//! this graph; this module only owns edge storage and adoption/release,
//! never evaluation.
//!
//! TERMINOLOGY:
//! - Parents: cells a formula references (its inputs).
//! - Children: cells that reference a given cell (reverse lookup).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cell::CellKey;

/// Directed edges between cells across the whole workbook.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    parents: HashMap<CellKey, HashSet<CellKey>>,
    children: HashMap<CellKey, HashSet<CellKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            parents: HashMap::new(),
            children: HashMap::new(),
        }
    }

    /// Drops every outgoing edge `cell -> *` (§4.6 step 1). Leaves
    /// incoming edges (cell's children) untouched.
    pub fn release_edges(&mut self, cell: CellKey) {
        if let Some(old_parents) = self.parents.remove(&cell) {
            for parent in old_parents {
                if let Some(children) = self.children.get_mut(&parent) {
                    children.remove(&cell);
                    if children.is_empty() {
                        self.children.remove(&parent);
                    }
                }
            }
        }
    }

    /// Replaces `cell`'s outgoing edges with `new_parents`, maintaining
    /// symmetry on both sides.
    pub fn adopt_edges(&mut self, cell: CellKey, new_parents: HashSet<CellKey>) {
        self.release_edges(cell);
        if new_parents.is_empty() {
            return;
        }
        for &parent in &new_parents {
            self.children.entry(parent).or_default().insert(cell);
        }
        self.parents.insert(cell, new_parents);
    }

    pub fn parents_of(&self, cell: CellKey) -> HashSet<CellKey> {
        self.parents.get(&cell).cloned().unwrap_or_default()
    }

    pub fn children_of(&self, cell: CellKey) -> HashSet<CellKey> {
        self.children.get(&cell).cloned().unwrap_or_default()
    }

    /// Every `(cell, parent)` edge in the graph. Used when sheet indices
    /// need to be renumbered (sheet deletion/move) and the graph has to be
    /// rebuilt wholesale rather than patched in place.
    pub fn all_edges(&self) -> impl Iterator<Item = (CellKey, CellKey)> + '_ {
        self.parents
            .iter()
            .flat_map(|(&cell, parents)| parents.iter().map(move |&parent| (cell, parent)))
    }

    /// Drops every edge mentioning `cell`, in either direction. Used when a
    /// cell is physically removed from its sheet.
    pub fn forget(&mut self, cell: CellKey) {
        self.release_edges(cell);
        if let Some(children) = self.children.remove(&cell) {
            for child in children {
                if let Some(parents) = self.parents.get_mut(&child) {
                    parents.remove(&cell);
                }
            }
        }
    }

    /// BFS over `children` edges: every cell transitively depending on
    /// `cell`, not including `cell` itself.
    pub fn transitive_children(&self, cell: CellKey) -> HashSet<CellKey> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<CellKey> = self.children_of(cell).into_iter().collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for next in self.children_of(current) {
                if !seen.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// BFS over `parents` edges: every cell `cell` transitively depends on,
    /// not including `cell` itself. Used by the cycle detector to explore
    /// the reachable subgraph in both directions.
    pub fn transitive_parents(&self, cell: CellKey) -> HashSet<CellKey> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<CellKey> = self.parents_of(cell).into_iter().collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for next in self.parents_of(current) {
                if !seen.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CellCoord;

    fn key(sheet: usize, col: u32, row: u32) -> CellKey {
        CellKey::new(sheet, CellCoord::new(col, row))
    }

    #[test]
    fn adopt_and_query_edges() {
        let mut graph = DependencyGraph::new();
        let a3 = key(0, 1, 3);
        let a1 = key(0, 1, 1);
        let a2 = key(0, 1, 2);
        graph.adopt_edges(a3, [a1, a2].into_iter().collect());

        assert_eq!(graph.parents_of(a3), [a1, a2].into_iter().collect());
        assert!(graph.children_of(a1).contains(&a3));
        assert!(graph.children_of(a2).contains(&a3));
    }

    #[test]
    fn release_clears_reverse_edges() {
        let mut graph = DependencyGraph::new();
        let a3 = key(0, 1, 3);
        let a1 = key(0, 1, 1);
        graph.adopt_edges(a3, [a1].into_iter().collect());
        graph.release_edges(a3);

        assert!(graph.parents_of(a3).is_empty());
        assert!(graph.children_of(a1).is_empty());
    }

    #[test]
    fn transitive_children_follows_chain() {
        let mut graph = DependencyGraph::new();
        let a1 = key(0, 1, 1);
        let a2 = key(0, 1, 2);
        let a3 = key(0, 1, 3);
        graph.adopt_edges(a2, [a1].into_iter().collect());
        graph.adopt_edges(a3, [a2].into_iter().collect());

        let deps = graph.transitive_children(a1);
        assert_eq!(deps, [a2, a3].into_iter().collect());
    }

    #[test]
    fn edges_cross_sheets() {
        let mut graph = DependencyGraph::new();
        let sheet0_a1 = key(0, 1, 1);
        let sheet1_a1 = key(1, 1, 1);
        graph.adopt_edges(sheet1_a1, [sheet0_a1].into_iter().collect());

        assert!(graph.children_of(sheet0_a1).contains(&sheet1_a1));
    }
}
