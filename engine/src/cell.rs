//! FILENAME: engine/src/cell.rs
//! PURPOSE: The atomic unit of a sheet.
//! CONTEXT: A cell owns its contents, its classified type, its current
//! value, an optional parse tree, and its edges into the dependency graph.
//! Edges are peer references (indices into the workbook's global cell
//! keying), never pointers, so cells never need to borrow one another.

use std::collections::HashSet;

use parser::Expression;

use crate::coord::CellCoord;
use crate::value::CellValue;

/// Global key for a cell: which sheet, and where on it. Used as the edge
/// endpoint type throughout the dependency graph so that edges can cross
/// sheets freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub sheet: usize,
    pub coord: CellCoord,
}

impl CellKey {
    pub fn new(sheet: usize, coord: CellCoord) -> Self {
        CellKey { sheet, coord }
    }
}

/// The classification recorded on the cell after the literal classifier
/// (C4) has run; distinct from `CellValue`, which is the evaluator's
/// output.
#[derive(Debug, Clone, PartialEq)]
pub enum CellType {
    Empty,
    Text,
    Number,
    Bool,
    Error,
    Formula,
}

/// A single spreadsheet cell. Cells are owned exclusively by their sheet;
/// edges to other cells are `CellKey`s, not references.
#[derive(Debug, Clone)]
pub struct Cell {
    pub coord: CellCoord,
    pub sheet: usize,
    /// Canonicalized raw contents (outer whitespace trimmed, except for
    /// verbatim-text cells where only the leading `'` is stripped).
    pub contents: String,
    pub cell_type: CellType,
    pub value: CellValue,
    pub parse_tree: Option<Expression>,
    /// Cells this cell's formula depends on.
    pub parents: HashSet<CellKey>,
    /// Cells depending on this cell.
    pub children: HashSet<CellKey>,
    /// Sheet names this cell's formula mentions that do not currently
    /// exist. Non-empty iff this cell is in the workbook's orphan set.
    pub invalid_sheet_refs: HashSet<String>,
}

impl Cell {
    /// A freshly materialized, empty placeholder cell — the state a cell
    /// is created in when it is first referenced as a dependency target,
    /// or retained in after its contents are cleared but it still has
    /// children.
    pub fn empty(sheet: usize, coord: CellCoord) -> Self {
        Cell {
            coord,
            sheet,
            contents: String::new(),
            cell_type: CellType::Empty,
            value: CellValue::Empty,
            parse_tree: None,
            parents: HashSet::new(),
            children: HashSet::new(),
            invalid_sheet_refs: HashSet::new(),
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.sheet, self.coord)
    }

    pub fn is_empty_leaf(&self) -> bool {
        self.cell_type == CellType::Empty && self.children.is_empty()
    }

    pub fn is_orphan(&self) -> bool {
        !self.invalid_sheet_refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_is_a_leaf_without_children() {
        let cell = Cell::empty(0, CellCoord::new(1, 1));
        assert!(cell.is_empty_leaf());
    }

    #[test]
    fn cell_with_children_is_not_a_leaf() {
        let mut cell = Cell::empty(0, CellCoord::new(1, 1));
        cell.children.insert(CellKey::new(0, CellCoord::new(2, 1)));
        assert!(!cell.is_empty_leaf());
    }

    #[test]
    fn orphan_tracks_invalid_sheet_refs() {
        let mut cell = Cell::empty(0, CellCoord::new(1, 1));
        assert!(!cell.is_orphan());
        cell.invalid_sheet_refs.insert("Sheet9".to_string());
        assert!(cell.is_orphan());
    }
}
