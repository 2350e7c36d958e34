//! FILENAME: engine/src/rewriter.rs
//! PURPOSE: C10 — purely syntactic visitors over parse trees: substitute a
//! sheet name on rename, or shift relative references by (Δcol, Δrow) on
//! move/copy/sort. Each visitor builds a *new* tree; the parse tree itself
//! is never mutated in place (§9: "keep the parse tree structurally
//! immutable").
//! CONTEXT: The rewritten tree still needs to be reconstructed to text
//! (`parser::reconstruct`) and fed back through `set_cell_contents` so
//! edges and values refresh normally (§4.10).

use parser::{reconstruct, BinaryOperator, CellRef, Expression, UnaryOperator, Value};

use crate::coord::{col_to_index, index_to_col, MAX_COL, MAX_ROW};

/// Replaces every reference whose sheet component case-insensitively
/// equals `old` with one naming `new`. Unqualified references and
/// references naming any other sheet are left untouched.
pub fn rename_sheet(expr: &Expression, old: &str, new: &str) -> Expression {
    match expr {
        Expression::Literal(v) => Expression::Literal(v.clone()),
        Expression::Reference(r) => {
            Expression::Reference(CellRef {
                sheet: rename_sheet_component(&r.sheet, old, new),
                ..r.clone()
            })
        }
        Expression::Range { sheet, start, end } => Expression::Range {
            sheet: rename_sheet_component(sheet, old, new),
            start: start.clone(),
            end: end.clone(),
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(rename_sheet(left, old, new)),
            op: *op,
            right: Box::new(rename_sheet(right, old, new)),
        },
        Expression::UnaryOp { op, operand } => Expression::UnaryOp {
            op: *op,
            operand: Box::new(rename_sheet(operand, old, new)),
        },
        Expression::FunctionCall { name, args } => Expression::FunctionCall {
            name: name.clone(),
            args: args.iter().map(|a| rename_sheet(a, old, new)).collect(),
        },
    }
}

fn rename_sheet_component(sheet: &Option<String>, old: &str, new: &str) -> Option<String> {
    match sheet {
        Some(name) if name.eq_ignore_ascii_case(old) => Some(new.to_string()),
        other => other.clone(),
    }
}

/// Renders `expr` back to canonical formula text after a rewrite, the
/// leading `=` included.
pub fn render(expr: &Expression) -> String {
    reconstruct(expr)
}

/// Shifts every relative (non-`$`-marked) reference by `(delta_col,
/// delta_row)`. A shifted reference that leaves the grid is replaced with
/// a `#REF!` literal in place, so the surrounding formula stays parseable.
pub fn shift(expr: &Expression, delta_col: i64, delta_row: i64) -> Expression {
    match expr {
        Expression::Literal(v) => Expression::Literal(v.clone()),
        Expression::Reference(r) => match shift_ref(r, delta_col, delta_row) {
            Some(shifted) => Expression::Reference(shifted),
            None => bad_reference_literal(),
        },
        Expression::Range { sheet, start, end } => {
            let shifted_start = shift_loc(start, delta_col, delta_row);
            let shifted_end = shift_loc(end, delta_col, delta_row);
            match (shifted_start, shifted_end) {
                (Some(s), Some(e)) => Expression::Range {
                    sheet: sheet.clone(),
                    start: s,
                    end: e,
                },
                _ => bad_reference_literal(),
            }
        }
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(shift(left, delta_col, delta_row)),
            op: *op,
            right: Box::new(shift(right, delta_col, delta_row)),
        },
        Expression::UnaryOp { op, operand } => Expression::UnaryOp {
            op: *op,
            operand: Box::new(shift(operand, delta_col, delta_row)),
        },
        Expression::FunctionCall { name, args } => Expression::FunctionCall {
            name: name.clone(),
            args: args.iter().map(|a| shift(a, delta_col, delta_row)).collect(),
        },
    }
}

fn bad_reference_literal() -> Expression {
    Expression::Literal(Value::Error("#REF!".to_string()))
}

fn shift_ref(r: &CellRef, delta_col: i64, delta_row: i64) -> Option<CellRef> {
    let (col, row, abs_col, abs_row) = (r.col.clone(), r.row, r.abs_col, r.abs_row);
    let (new_col, new_row) = shift_components(&col, row, abs_col, abs_row, delta_col, delta_row)?;
    Some(CellRef {
        sheet: r.sheet.clone(),
        col: new_col,
        row: new_row,
        abs_col,
        abs_row,
    })
}

fn shift_loc(
    loc: &(String, u32, bool, bool),
    delta_col: i64,
    delta_row: i64,
) -> Option<(String, u32, bool, bool)> {
    let (col, row, abs_col, abs_row) = loc.clone();
    let (new_col, new_row) = shift_components(&col, row, abs_col, abs_row, delta_col, delta_row)?;
    Some((new_col, new_row, abs_col, abs_row))
}

/// Shifts the column/row pair, preserving the original column text
/// (including case) when the column axis is absolute and therefore
/// unmoved; only a relative column that actually shifts is re-rendered
/// through the codec (which normalizes to uppercase).
fn shift_components(
    col: &str,
    row: u32,
    abs_col: bool,
    abs_row: bool,
    delta_col: i64,
    delta_row: i64,
) -> Option<(String, u32)> {
    let new_col = if abs_col {
        col.to_string()
    } else {
        let col_index = col_to_index(col)?;
        let shifted = col_index as i64 + delta_col;
        if shifted < 1 || shifted > MAX_COL as i64 {
            return None;
        }
        index_to_col(shifted as u32)
    };
    let new_row = if abs_row {
        row
    } else {
        let shifted = row as i64 + delta_row;
        if shifted < 1 || shifted > MAX_ROW as i64 {
            return None;
        }
        shifted as u32
    };
    Some((new_col, new_row))
}
