//! FILENAME: engine/src/lib.rs
//! PURPOSE: Main library entry point for the spreadsheet calculation engine.
//! CONTEXT: Re-exports public types and modules for use by other crates
//! (`persistence`, and any host application).

pub mod cell;
pub mod coord;
pub mod cycle;
pub mod dependency_extractor;
pub mod dependency_graph;
pub mod error;
pub mod evaluator;
pub mod grid;
pub mod literal;
pub mod rewriter;
pub mod scheduler;
pub mod value;
pub mod workbook;

pub use cell::{Cell, CellKey, CellType};
pub use coord::{index_to_col, quantify_loc, stringify_loc, CellCoord, MAX_COL, MAX_ROW};
pub use error::{CellError, ErrorKind, WorkbookError};
pub use evaluator::{EvalContext, Evaluator};
pub use grid::Sheet;
pub use value::CellValue;
pub use workbook::Workbook;

/// The engine's own version, exposed to formulas via `VERSION()` (§4.7).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workbook_starts_with_one_sheet() {
        let wb = Workbook::new();
        assert_eq!(wb.num_sheets(), 1);
    }

    #[test]
    fn end_to_end_formula_recompute() {
        let mut wb = Workbook::new();
        let sheet = wb.list_sheets()[0].clone();
        wb.set_cell_contents(&sheet, "A1", Some("10".to_string())).unwrap();
        wb.set_cell_contents(&sheet, "B1", Some("20".to_string())).unwrap();
        wb.set_cell_contents(&sheet, "C1", Some("=A1+B1".to_string())).unwrap();

        match wb.get_cell_value(&sheet, "C1").unwrap() {
            CellValue::Number(n) => assert_eq!(n.to_string(), "30"),
            other => panic!("expected 30, got {:?}", other),
        }

        wb.set_cell_contents(&sheet, "A1", Some("15".to_string())).unwrap();
        match wb.get_cell_value(&sheet, "C1").unwrap() {
            CellValue::Number(n) => assert_eq!(n.to_string(), "35"),
            other => panic!("expected 35, got {:?}", other),
        }
    }

    #[test]
    fn version_matches_crate_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
