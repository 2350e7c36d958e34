//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: C8 — walks a parse tree against a workbook view, producing a
//! value or an error, with the full error taxonomy from §4.8.
//! CONTEXT: The evaluator never mutates anything; unknown-sheet references
//! it encounters are recorded in a side channel (`sheet_misses`) rather
//! than surfaced as a panic, since the caller (the update scheduler) needs
//! the full set to repopulate `invalidSheetRefs` after the walk (§4.9
//! step 4).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashSet;

use rust_decimal::Decimal;

use parser::{BinaryOperator, CellRef, Expression, UnaryOperator, Value};

use crate::coord::{col_to_index, CellCoord};
use crate::error::{CellError, ErrorKind};
use crate::value::{parse_decimal_str, CellValue};

/// The workbook view the evaluator reads against. Implemented by
/// `Workbook` itself; kept as a trait so evaluation can be tested against
/// small fixtures without constructing a full workbook.
pub trait EvalContext {
    fn current_sheet(&self) -> &str;
    fn sheet_exists(&self, name: &str) -> bool;
    /// Value stored at `(sheet, coord)`. `Empty` for an unstored location on
    /// an existing sheet; callers must check `sheet_exists` first.
    fn cell_value(&self, sheet: &str, coord: CellCoord) -> CellValue;
}

/// Either a single value or the rectangular table a range reference
/// produces. Only function arguments may consume the `Range` variant;
/// every other context collapses it to a `Type` error.
enum EvalOutput {
    Scalar(CellValue),
    Range(Vec<Vec<CellValue>>),
}

pub struct Evaluator<'a> {
    ctx: &'a dyn EvalContext,
    sheet_misses: RefCell<HashSet<String>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a dyn EvalContext) -> Self {
        Evaluator {
            ctx,
            sheet_misses: RefCell::new(HashSet::new()),
        }
    }

    /// Sheet names referenced during the walk that did not exist. Feeds
    /// §4.9 step 4 (repopulating `invalidSheetRefs`).
    pub fn into_sheet_misses(self) -> HashSet<String> {
        self.sheet_misses.into_inner()
    }

    /// Top-level entry point: evaluates a cell's formula tree to the value
    /// that gets stored on the cell. A bare range at the top level (no
    /// function to consume it) is a `Type` error.
    pub fn evaluate(&self, expr: &Expression) -> CellValue {
        match self.eval(expr) {
            EvalOutput::Scalar(v) => v,
            EvalOutput::Range(_) => CellValue::Error(CellError::new(ErrorKind::Type)),
        }
    }

    fn eval(&self, expr: &Expression) -> EvalOutput {
        match expr {
            Expression::Literal(v) => EvalOutput::Scalar(self.eval_literal(v)),
            Expression::Reference(r) => EvalOutput::Scalar(self.eval_reference(r)),
            Expression::Range { sheet, start, end } => self.eval_range(sheet, start, end),
            Expression::BinaryOp { left, op, right } => {
                EvalOutput::Scalar(self.eval_binary_op(left, *op, right))
            }
            Expression::UnaryOp { op, operand } => {
                EvalOutput::Scalar(self.eval_unary_op(*op, operand))
            }
            Expression::FunctionCall { name, args } => self.eval_function(name, args),
        }
    }

    fn eval_scalar(&self, expr: &Expression) -> CellValue {
        match self.eval(expr) {
            EvalOutput::Scalar(v) => v,
            EvalOutput::Range(_) => CellValue::Error(CellError::new(ErrorKind::Type)),
        }
    }

    fn eval_literal(&self, v: &Value) -> CellValue {
        match v {
            Value::Number(s) => match parse_decimal_str(s) {
                Some(d) => CellValue::number(d),
                None => CellValue::Error(CellError::new(ErrorKind::Parse)),
            },
            Value::Text(s) => CellValue::Text(s.clone()),
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Error(s) => match ErrorKind::from_literal(s) {
                Some(kind) => CellValue::Error(CellError::new(kind)),
                None => CellValue::Error(CellError::new(ErrorKind::Parse)),
            },
        }
    }

    /// Resolves a reference's sheet component. `None` means the current
    /// sheet; `Some(name)` must name an existing sheet or this records the
    /// miss and returns `BadReference`.
    fn resolve_sheet(&self, sheet: &Option<String>) -> Result<String, ErrorKind> {
        match sheet {
            None => Ok(self.ctx.current_sheet().to_string()),
            Some(name) => {
                if self.ctx.sheet_exists(name) {
                    Ok(name.clone())
                } else {
                    self.sheet_misses.borrow_mut().insert(name.clone());
                    Err(ErrorKind::BadReference)
                }
            }
        }
    }

    fn eval_reference(&self, r: &CellRef) -> CellValue {
        let sheet = match self.resolve_sheet(&r.sheet) {
            Ok(s) => s,
            Err(kind) => return CellValue::Error(CellError::new(kind)),
        };
        let col = match col_to_index(&r.col) {
            Some(c) => c,
            None => return CellValue::Error(CellError::new(ErrorKind::BadReference)),
        };
        let coord = CellCoord::new(col, r.row);
        if !coord.in_bounds() {
            return CellValue::Error(CellError::new(ErrorKind::BadReference));
        }
        self.ctx.cell_value(&sheet, coord)
    }

    fn eval_range(
        &self,
        sheet: &Option<String>,
        start: &(String, u32, bool, bool),
        end: &(String, u32, bool, bool),
    ) -> EvalOutput {
        let sheet_name = match self.resolve_sheet(sheet) {
            Ok(s) => s,
            Err(kind) => return EvalOutput::Scalar(CellValue::Error(CellError::new(kind))),
        };
        let (start_col, end_col) = match (col_to_index(&start.0), col_to_index(&end.0)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::BadReference)))
            }
        };
        let min_col = start_col.min(end_col);
        let max_col = start_col.max(end_col);
        let min_row = start.1.min(end.1);
        let max_row = start.1.max(end.1);

        let mut table = Vec::new();
        for row in min_row..=max_row {
            let mut cells = Vec::new();
            for col in min_col..=max_col {
                let coord = CellCoord::new(col, row);
                if !coord.in_bounds() {
                    return EvalOutput::Scalar(CellValue::Error(CellError::new(
                        ErrorKind::BadReference,
                    )));
                }
                cells.push(self.ctx.cell_value(&sheet_name, coord));
            }
            table.push(cells);
        }
        EvalOutput::Range(table)
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn eval_binary_op(&self, left: &Expression, op: BinaryOperator, right: &Expression) -> CellValue {
        let l = self.eval_scalar(left);
        let r = self.eval_scalar(right);
        match op {
            BinaryOperator::Add => arith(&l, &r, |a, b| Ok(a + b)),
            BinaryOperator::Subtract => arith(&l, &r, |a, b| Ok(a - b)),
            BinaryOperator::Multiply => arith(&l, &r, |a, b| Ok(a * b)),
            BinaryOperator::Divide => arith(&l, &r, |a, b| {
                if b.is_zero() {
                    Err(ErrorKind::DivZero)
                } else {
                    Ok(a / b)
                }
            }),
            BinaryOperator::Concat => eval_concat(&l, &r),
            BinaryOperator::Equal => eval_compare(&l, &r, |o| o == Ordering::Equal),
            BinaryOperator::NotEqual => eval_compare(&l, &r, |o| o != Ordering::Equal),
            BinaryOperator::LessThan => eval_compare(&l, &r, |o| o == Ordering::Less),
            BinaryOperator::GreaterThan => eval_compare(&l, &r, |o| o == Ordering::Greater),
            BinaryOperator::LessEqual => eval_compare(&l, &r, |o| o != Ordering::Greater),
            BinaryOperator::GreaterEqual => eval_compare(&l, &r, |o| o != Ordering::Less),
        }
    }

    fn eval_unary_op(&self, op: UnaryOperator, operand: &Expression) -> CellValue {
        let v = self.eval_scalar(operand);
        if let CellValue::Error(e) = &v {
            return CellValue::Error(e.clone());
        }
        let n = match v.coerce_number() {
            Some(n) => n,
            None => return CellValue::Error(CellError::new(ErrorKind::Type)),
        };
        match op {
            UnaryOperator::Plus => CellValue::number(n),
            UnaryOperator::Negate => CellValue::number(-n),
        }
    }

    // ------------------------------------------------------------------
    // Function dispatch
    // ------------------------------------------------------------------

    fn eval_function(&self, name: &str, args: &[Expression]) -> EvalOutput {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "AND" => EvalOutput::Scalar(self.logical_reduce(args, true, |acc, v| acc && v)),
            "OR" => EvalOutput::Scalar(self.logical_reduce(args, false, |acc, v| acc || v)),
            "XOR" => EvalOutput::Scalar(self.logical_xor(args)),
            "NOT" => EvalOutput::Scalar(self.fn_not(args)),
            "EXACT" => EvalOutput::Scalar(self.fn_exact(args)),
            "IF" => self.fn_if(args),
            "IFERROR" => self.fn_iferror(args),
            "CHOOSE" => self.fn_choose(args),
            "ISBLANK" => EvalOutput::Scalar(self.fn_isblank(args)),
            "ISERROR" => EvalOutput::Scalar(self.fn_iserror(args)),
            "VERSION" => EvalOutput::Scalar(CellValue::Text(
                env!("CARGO_PKG_VERSION").to_string(),
            )),
            "INDIRECT" => EvalOutput::Scalar(self.fn_indirect(args)),
            "MIN" => EvalOutput::Scalar(self.fn_aggregate(args, Aggregate::Min)),
            "MAX" => EvalOutput::Scalar(self.fn_aggregate(args, Aggregate::Max)),
            "SUM" => EvalOutput::Scalar(self.fn_aggregate(args, Aggregate::Sum)),
            "AVERAGE" => EvalOutput::Scalar(self.fn_aggregate(args, Aggregate::Average)),
            "HLOOKUP" => EvalOutput::Scalar(self.fn_lookup(args, Lookup::Horizontal)),
            "VLOOKUP" => EvalOutput::Scalar(self.fn_lookup(args, Lookup::Vertical)),
            _ => EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::BadName))),
        }
    }

    fn eval_arg_reject_range(&self, expr: &Expression) -> CellValue {
        match self.eval(expr) {
            EvalOutput::Scalar(v) => v,
            EvalOutput::Range(_) => CellValue::Error(CellError::new(ErrorKind::Type)),
        }
    }

    fn eval_arg_flat(&self, expr: &Expression) -> Vec<CellValue> {
        match self.eval(expr) {
            EvalOutput::Scalar(v) => vec![v],
            EvalOutput::Range(table) => table.into_iter().flatten().collect(),
        }
    }

    fn eval_arg_table(&self, expr: &Expression) -> Vec<Vec<CellValue>> {
        match self.eval(expr) {
            EvalOutput::Scalar(v) => vec![vec![v]],
            EvalOutput::Range(table) => table,
        }
    }

    fn logical_reduce(
        &self,
        args: &[Expression],
        identity: bool,
        fold: fn(bool, bool) -> bool,
    ) -> CellValue {
        if args.is_empty() {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let mut acc = identity;
        for arg in args {
            let v = self.eval_arg_reject_range(arg);
            if let CellValue::Error(e) = &v {
                return CellValue::Error(e.clone());
            }
            match v.coerce_bool() {
                Some(b) => acc = fold(acc, b),
                None => return CellValue::Error(CellError::new(ErrorKind::Type)),
            }
        }
        CellValue::Bool(acc)
    }

    fn logical_xor(&self, args: &[Expression]) -> CellValue {
        if args.is_empty() {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let mut trues = 0usize;
        for arg in args {
            let v = self.eval_arg_reject_range(arg);
            if let CellValue::Error(e) = &v {
                return CellValue::Error(e.clone());
            }
            match v.coerce_bool() {
                Some(true) => trues += 1,
                Some(false) => {}
                None => return CellValue::Error(CellError::new(ErrorKind::Type)),
            }
        }
        CellValue::Bool(trues % 2 == 1)
    }

    fn fn_not(&self, args: &[Expression]) -> CellValue {
        if args.len() != 1 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let v = self.eval_arg_reject_range(&args[0]);
        if let CellValue::Error(e) = &v {
            return CellValue::Error(e.clone());
        }
        match v.coerce_bool() {
            Some(b) => CellValue::Bool(!b),
            None => CellValue::Error(CellError::new(ErrorKind::Type)),
        }
    }

    fn fn_exact(&self, args: &[Expression]) -> CellValue {
        if args.len() != 2 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let a = self.eval_arg_reject_range(&args[0]);
        let b = self.eval_arg_reject_range(&args[1]);
        if let Some(kind) = first_error(&[a.clone(), b.clone()]) {
            return CellValue::Error(CellError::new(kind));
        }
        CellValue::Bool(a.coerce_text() == b.coerce_text())
    }

    fn fn_if(&self, args: &[Expression]) -> EvalOutput {
        if args.len() < 2 || args.len() > 3 {
            return EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::Type)));
        }
        let cond = self.eval_arg_reject_range(&args[0]);
        if let CellValue::Error(e) = &cond {
            return EvalOutput::Scalar(CellValue::Error(e.clone()));
        }
        let truthy = match cond.coerce_bool() {
            Some(b) => b,
            None => return EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::Type))),
        };
        if truthy {
            coerce_empty_branch(self.eval(&args[1]))
        } else if args.len() == 3 {
            coerce_empty_branch(self.eval(&args[2]))
        } else {
            EvalOutput::Scalar(CellValue::Bool(false))
        }
    }

    fn fn_iferror(&self, args: &[Expression]) -> EvalOutput {
        if args.is_empty() || args.len() > 2 {
            return EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::Type)));
        }
        let v = self.eval_arg_reject_range(&args[0]);
        if v.is_error() {
            if args.len() == 2 {
                self.eval(&args[1])
            } else {
                EvalOutput::Scalar(CellValue::Text(String::new()))
            }
        } else {
            EvalOutput::Scalar(v)
        }
    }

    fn fn_choose(&self, args: &[Expression]) -> EvalOutput {
        if args.len() < 2 {
            return EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::Type)));
        }
        let idx = self.eval_arg_reject_range(&args[0]);
        if let CellValue::Error(e) = &idx {
            return EvalOutput::Scalar(CellValue::Error(e.clone()));
        }
        let choices = &args[1..];
        match as_positive_index(&idx, choices.len()) {
            Some(i) => coerce_empty_branch(self.eval(&choices[i - 1])),
            None => EvalOutput::Scalar(CellValue::Error(CellError::new(ErrorKind::Type))),
        }
    }

    fn fn_isblank(&self, args: &[Expression]) -> CellValue {
        if args.len() != 1 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        CellValue::Bool(self.eval_arg_reject_range(&args[0]).is_empty())
    }

    fn fn_iserror(&self, args: &[Expression]) -> CellValue {
        if args.len() != 1 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        CellValue::Bool(self.eval_arg_reject_range(&args[0]).is_error())
    }

    fn fn_indirect(&self, args: &[Expression]) -> CellValue {
        if args.len() != 1 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let v = self.eval_arg_reject_range(&args[0]);
        if let CellValue::Error(e) = &v {
            return CellValue::Error(e.clone());
        }
        let text = v.coerce_text();
        match parser::parse(text.trim()) {
            Ok(Expression::Reference(r)) => self.eval_reference(&r),
            _ => CellValue::Error(CellError::new(ErrorKind::BadReference)),
        }
    }

    fn fn_aggregate(&self, args: &[Expression], kind: Aggregate) -> CellValue {
        let mut values = Vec::new();
        for arg in args {
            values.extend(self.eval_arg_flat(arg));
        }
        if let Some(kind_err) = first_error(&values) {
            return CellValue::Error(CellError::new(kind_err));
        }
        let mut numbers = Vec::new();
        for v in &values {
            if v.is_empty() {
                continue;
            }
            match v.coerce_number() {
                Some(n) => numbers.push(n),
                None => return CellValue::Error(CellError::new(ErrorKind::Type)),
            }
        }
        if numbers.is_empty() {
            return match kind {
                Aggregate::Average => CellValue::Error(CellError::new(ErrorKind::DivZero)),
                _ => CellValue::number(Decimal::ZERO),
            };
        }
        let result = match kind {
            Aggregate::Min => *numbers.iter().min().unwrap(),
            Aggregate::Max => *numbers.iter().max().unwrap(),
            Aggregate::Sum => numbers.iter().sum(),
            Aggregate::Average => {
                let sum: Decimal = numbers.iter().sum();
                sum / Decimal::from(numbers.len() as u64)
            }
        };
        CellValue::number(result)
    }

    fn fn_lookup(&self, args: &[Expression], kind: Lookup) -> CellValue {
        if args.len() != 3 {
            return CellValue::Error(CellError::new(ErrorKind::Type));
        }
        let key = self.eval_arg_reject_range(&args[0]);
        if let CellValue::Error(e) = &key {
            return CellValue::Error(e.clone());
        }
        let idx = self.eval_arg_reject_range(&args[2]);
        if let CellValue::Error(e) = &idx {
            return CellValue::Error(e.clone());
        }
        let table = self.eval_arg_table(&args[1]);

        match kind {
            Lookup::Horizontal => {
                let header = match table.first() {
                    Some(row) => row,
                    None => return CellValue::Error(CellError::new(ErrorKind::Type)),
                };
                let col = match header.iter().position(|v| values_match(v, &key)) {
                    Some(c) => c,
                    None => return CellValue::Error(CellError::new(ErrorKind::Type)),
                };
                let row_idx = match as_positive_index(&idx, table.len()) {
                    Some(i) => i - 1,
                    None => return CellValue::Error(CellError::new(ErrorKind::Type)),
                };
                match table.get(row_idx).and_then(|row| row.get(col)) {
                    Some(v) => v.clone(),
                    None => CellValue::Error(CellError::new(ErrorKind::Type)),
                }
            }
            Lookup::Vertical => {
                let row_of = |r: &Vec<CellValue>| r.first().cloned();
                let first_col: Vec<CellValue> =
                    table.iter().filter_map(row_of).collect();
                let row = match first_col.iter().position(|v| values_match(v, &key)) {
                    Some(r) => r,
                    None => return CellValue::Error(CellError::new(ErrorKind::Type)),
                };
                let col_count = table.first().map(|r| r.len()).unwrap_or(0);
                let col_idx = match as_positive_index(&idx, col_count) {
                    Some(i) => i - 1,
                    None => return CellValue::Error(CellError::new(ErrorKind::Type)),
                };
                match table.get(row).and_then(|r| r.get(col_idx)) {
                    Some(v) => v.clone(),
                    None => CellValue::Error(CellError::new(ErrorKind::Type)),
                }
            }
        }
    }
}

enum Aggregate {
    Min,
    Max,
    Sum,
    Average,
}

enum Lookup {
    Horizontal,
    Vertical,
}

/// §4.2's empty-branch coercion for `IF`/`CHOOSE`: a selected branch that
/// evaluates to Empty becomes `Decimal(0)`, never `false` — only the
/// caller-omitted else-branch of `IF` returns `false` (handled separately).
fn coerce_empty_branch(output: EvalOutput) -> EvalOutput {
    match output {
        EvalOutput::Scalar(CellValue::Empty) => EvalOutput::Scalar(CellValue::number(Decimal::ZERO)),
        other => other,
    }
}

fn as_positive_index(v: &CellValue, max: usize) -> Option<usize> {
    let n = v.coerce_number()?;
    if n.fract() != Decimal::ZERO || n < Decimal::ONE {
        return None;
    }
    let i: usize = n.to_string().parse().ok()?;
    if i >= 1 && i <= max {
        Some(i)
    } else {
        None
    }
}

fn values_match(a: &CellValue, b: &CellValue) -> bool {
    matches!(compare_values(a, b), Ok(Ordering::Equal))
}

fn first_error(values: &[CellValue]) -> Option<ErrorKind> {
    let mut result: Option<ErrorKind> = None;
    for v in values {
        if let CellValue::Error(e) = v {
            result = Some(match result {
                Some(r) => r.dominant(e.kind),
                None => e.kind,
            });
        }
    }
    result
}

fn arith(a: &CellValue, b: &CellValue, op: impl Fn(Decimal, Decimal) -> Result<Decimal, ErrorKind>) -> CellValue {
    if let Some(kind) = first_error(&[a.clone(), b.clone()]) {
        return CellValue::Error(CellError::new(kind));
    }
    let (x, y) = match (a.coerce_number(), b.coerce_number()) {
        (Some(x), Some(y)) => (x, y),
        _ => return CellValue::Error(CellError::new(ErrorKind::Type)),
    };
    match op(x, y) {
        Ok(result) => CellValue::number(result),
        Err(kind) => CellValue::Error(CellError::new(kind)),
    }
}

fn eval_concat(a: &CellValue, b: &CellValue) -> CellValue {
    if let Some(kind) = first_error(&[a.clone(), b.clone()]) {
        return CellValue::Error(CellError::new(kind));
    }
    CellValue::Text(format!("{}{}", a.coerce_text(), b.coerce_text()))
}

fn eval_compare(a: &CellValue, b: &CellValue, accept: impl Fn(Ordering) -> bool) -> CellValue {
    match compare_values(a, b) {
        Ok(ordering) => CellValue::Bool(accept(ordering)),
        Err(kind) => CellValue::Error(CellError::new(kind)),
    }
}

/// §4.8 comparison semantics: empty vs empty is equal; empty vs typed
/// takes the typed side's zero-value; strings compare case-insensitively;
/// across types the ranking `Number < Text < Bool` decides.
fn compare_values(a: &CellValue, b: &CellValue) -> Result<Ordering, ErrorKind> {
    if let Some(kind) = first_error(&[a.clone(), b.clone()]) {
        return Err(kind);
    }
    let (a, b) = match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => (zero_value_like(b), b.clone()),
        (false, true) => (a.clone(), zero_value_like(a)),
        (false, false) => (a.clone(), b.clone()),
    };
    if a.type_rank() == b.type_rank() {
        match (&a, &b) {
            (CellValue::Number(x), CellValue::Number(y)) => Ok(x.cmp(y)),
            (CellValue::Text(x), CellValue::Text(y)) => {
                Ok(x.to_ascii_uppercase().cmp(&y.to_ascii_uppercase()))
            }
            (CellValue::Bool(x), CellValue::Bool(y)) => Ok(x.cmp(y)),
            _ => Ok(Ordering::Equal),
        }
    } else {
        Ok(a.type_rank().cmp(&b.type_rank()))
    }
}

fn zero_value_like(other: &CellValue) -> CellValue {
    match other {
        CellValue::Number(_) => CellValue::number(Decimal::ZERO),
        CellValue::Text(_) => CellValue::Text(String::new()),
        CellValue::Bool(_) => CellValue::Bool(false),
        CellValue::Empty | CellValue::Error(_) => CellValue::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::collections::HashMap;

    struct FixtureContext {
        sheet: String,
        sheets: Vec<String>,
        cells: StdRefCell<HashMap<(String, u32, u32), CellValue>>,
    }

    impl FixtureContext {
        fn new() -> Self {
            FixtureContext {
                sheet: "Sheet1".to_string(),
                sheets: vec!["Sheet1".to_string()],
                cells: StdRefCell::new(HashMap::new()),
            }
        }

        fn set(&self, col: u32, row: u32, value: CellValue) {
            self.cells
                .borrow_mut()
                .insert((self.sheet.clone(), col, row), value);
        }
    }

    impl EvalContext for FixtureContext {
        fn current_sheet(&self) -> &str {
            &self.sheet
        }
        fn sheet_exists(&self, name: &str) -> bool {
            self.sheets.iter().any(|s| s.eq_ignore_ascii_case(name))
        }
        fn cell_value(&self, sheet: &str, coord: CellCoord) -> CellValue {
            self.cells
                .borrow()
                .get(&(sheet.to_string(), coord.col, coord.row))
                .cloned()
                .unwrap_or(CellValue::Empty)
        }
    }

    fn num(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn scenario_s1_basic_formula() {
        let ctx = FixtureContext::new();
        ctx.set(1, 1, CellValue::Text("123".to_string()));
        ctx.set(2, 1, CellValue::number(num("5.3")));
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("A1*B1").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Number(n) => assert_eq!(n.to_string(), "651.9"),
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero_yields_div_zero() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("1/0").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::DivZero),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_sheet_reference_is_bad_reference_and_recorded() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("Sheet2!A1").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::BadReference),
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(evaluator.into_sheet_misses().contains("Sheet2"));
    }

    #[test]
    fn scenario_s7_range_sum_with_empties() {
        let ctx = FixtureContext::new();
        ctx.set(1, 1, CellValue::number(num("33")));
        ctx.set(1, 2, CellValue::number(num("22")));
        ctx.set(1, 3, CellValue::number(num("11")));
        ctx.set(1, 4, CellValue::number(num("44")));
        ctx.set(2, 1, CellValue::number(num("32")));
        ctx.set(2, 2, CellValue::number(num("21")));
        ctx.set(2, 3, CellValue::number(num("10")));
        ctx.set(2, 4, CellValue::number(num("43")));
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("SUM(A1:B4)").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Number(n) => assert_eq!(n.to_string(), "216"),
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn average_of_empty_range_is_div_zero() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("AVERAGE(L15:M20)").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::DivZero),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn if_with_empty_branch_coerces_to_zero() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("IF(TRUE,A5)").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Number(n) => assert!(n.is_zero()),
            other => panic!("expected zero, got {:?}", other),
        }
    }

    #[test]
    fn exact_coerces_empty_to_empty_string_on_both_sides() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse(r#"EXACT(A9,"")"#).unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Bool(b) => assert!(b),
            other => panic!("expected true, got {:?}", other),
        }
    }

    #[test]
    fn unknown_function_name_is_bad_name() {
        let ctx = FixtureContext::new();
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse("NOPE(1)").unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::BadName),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn vlookup_exact_type_and_value_match() {
        let ctx = FixtureContext::new();
        ctx.set(1, 1, CellValue::Text("key".to_string()));
        ctx.set(2, 1, CellValue::number(num("1")));
        ctx.set(1, 2, CellValue::Text("target".to_string()));
        ctx.set(2, 2, CellValue::number(num("42")));
        let evaluator = Evaluator::new(&ctx);
        let expr = parser::parse(r#"VLOOKUP("target",A1:B2,2)"#).unwrap();
        match evaluator.evaluate(&expr) {
            CellValue::Number(n) => assert_eq!(n.to_string(), "42"),
            other => panic!("expected a number, got {:?}", other),
        }
    }
}
