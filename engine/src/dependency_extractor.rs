//! FILENAME: engine/src/dependency_extractor.rs
//! PURPOSE: Walks a parsed formula tree and collects every cell location it
//! mentions, expanding ranges into their member cells.
//! CONTEXT: Feeds C6's edge-adoption step (§4.6): for each reference found
//! here, the dependency graph either materializes a placeholder cell and
//! adds an edge, or (for an unknown sheet) records an orphan marker.

use std::collections::HashSet;

use parser::{CellRef, Expression};

/// A single referenced location, sheet-qualified if the formula named one
/// explicitly. `col`/`row` are the raw text/number as written; callers run
/// them through the location codec to validate and resolve coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferencedLoc {
    pub sheet: Option<String>,
    pub col: String,
    pub row: u32,
}

impl ReferencedLoc {
    fn from_ref(r: &CellRef) -> Self {
        ReferencedLoc {
            sheet: r.sheet.clone(),
            col: r.col.clone(),
            row: r.row,
        }
    }
}

/// Collects every location referenced anywhere in `expr`, expanding ranges
/// to their full rectangle. Column letters are compared via the codec by
/// the caller, not here, so reversed ranges (`B2:A1`) are handled by
/// normalizing on the numeric column index.
pub fn collect_references(expr: &Expression) -> HashSet<ReferencedLoc> {
    let mut found = HashSet::new();
    walk(expr, &mut found);
    found
}

fn walk(expr: &Expression, found: &mut HashSet<ReferencedLoc>) {
    match expr {
        Expression::Literal(_) => {}
        Expression::Reference(r) => {
            found.insert(ReferencedLoc::from_ref(r));
        }
        Expression::Range { sheet, start, end } => {
            expand_range(sheet.clone(), start, end, found);
        }
        Expression::BinaryOp { left, right, .. } => {
            walk(left, found);
            walk(right, found);
        }
        Expression::UnaryOp { operand, .. } => {
            walk(operand, found);
        }
        Expression::FunctionCall { args, .. } => {
            for arg in args {
                walk(arg, found);
            }
        }
    }
}

fn expand_range(
    sheet: Option<String>,
    start: &(String, u32, bool, bool),
    end: &(String, u32, bool, bool),
    found: &mut HashSet<ReferencedLoc>,
) {
    let start_col = crate::coord::col_to_index(&start.0);
    let end_col = crate::coord::col_to_index(&end.0);
    let (start_col, end_col) = match (start_col, end_col) {
        (Some(a), Some(b)) => (a, b),
        _ => return,
    };
    let min_col = start_col.min(end_col);
    let max_col = start_col.max(end_col);
    let min_row = start.1.min(end.1);
    let max_row = start.1.max(end.1);

    for col in min_col..=max_col {
        for row in min_row..=max_row {
            found.insert(ReferencedLoc {
                sheet: sheet.clone(),
                col: crate::coord::index_to_col(col),
                row,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::parse;

    #[test]
    fn single_reference() {
        let expr = parse("A1").unwrap();
        let refs = collect_references(&expr);
        assert_eq!(refs.len(), 1);
        assert!(refs.contains(&ReferencedLoc {
            sheet: None,
            col: "A".to_string(),
            row: 1,
        }));
    }

    #[test]
    fn range_expands_to_every_cell() {
        let expr = parse("SUM(A1:B2)").unwrap();
        let refs = collect_references(&expr);
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn reversed_range_still_expands() {
        let expr = parse("SUM(B2:A1)").unwrap();
        let refs = collect_references(&expr);
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn sheet_qualified_reference_carries_sheet_name() {
        let expr = parse("Sheet2!A1").unwrap();
        let refs = collect_references(&expr);
        let only = refs.iter().next().unwrap();
        assert_eq!(only.sheet.as_deref(), Some("Sheet2"));
    }

    #[test]
    fn duplicate_references_collapse() {
        let expr = parse("A1+A1").unwrap();
        assert_eq!(collect_references(&expr).len(), 1);
    }
}
