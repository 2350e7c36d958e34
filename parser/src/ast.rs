//! FILENAME: parser/src/ast.rs
//! The parse tree produced by `parser::parse` and the canonical-text
//! reconstructor used by the formula rewriter (engine's C10).

use std::fmt;

/// A literal atom.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw decimal literal text (e.g. `"5.30"`), exactly as written.
    Number(String),
    Text(String),
    Bool(bool),
    /// Canonical error-literal spelling, e.g. `"#REF!"`.
    Error(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(s) => write!(f, "{}", s),
            Value::Text(s) => write!(f, "\"{}\"", escape_string(s)),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Error(s) => write!(f, "{}", s),
        }
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A single cell reference, with the absolute-reference markers the
/// rewriter needs (§4.3, §4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct CellRef {
    pub sheet: Option<String>,
    /// Column letters exactly as written (case preserved).
    pub col: String,
    pub row: u32,
    pub abs_col: bool,
    pub abs_row: bool,
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", format_sheet_name(sheet))?;
        }
        fmt_loc_part(f, &self.col, self.row, self.abs_col, self.abs_row)
    }
}

/// Quotes `name` with single quotes (doubling interior quotes) unless it
/// already matches the bare-identifier rule `[A-Za-z_][A-Za-z0-9_]*`.
pub fn format_sheet_name(name: &str) -> String {
    if is_bare_sheet_name(name) {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// The six canonical error-literal spellings the grammar accepts as atoms.
/// Duplicated here (rather than referencing `engine::ErrorKind`) because
/// this crate carries no dependency on `engine`.
pub const ERROR_LITERALS: [&str; 6] = [
    "#ERROR!",
    "#CIRCREF!",
    "#REF!",
    "#NAME?",
    "#VALUE!",
    "#DIV/0!",
];

/// Case-insensitive membership check against `ERROR_LITERALS`.
pub fn is_error_literal(s: &str) -> bool {
    ERROR_LITERALS.iter().any(|lit| lit.eq_ignore_ascii_case(s))
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn is_bare_sheet_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Concat => "&",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Negate,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if *self == UnaryOperator::Negate { "-" } else { "+" })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Reference(CellRef),
    /// `start:end`, with the sheet prefix (if any) attached once to the
    /// whole range rather than repeated on each side.
    Range {
        sheet: Option<String>,
        start: (String, u32, bool, bool),
        end: (String, u32, bool, bool),
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
}

fn fmt_loc_part(f: &mut fmt::Formatter<'_>, col: &str, row: u32, abs_col: bool, abs_row: bool) -> fmt::Result {
    if abs_col {
        write!(f, "$")?;
    }
    write!(f, "{}", col)?;
    if abs_row {
        write!(f, "$")?;
    }
    write!(f, "{}", row)
}

/// Precedence tier for a binary operator, loosest to tightest, matching
/// the parser's climb (`parse_comparison` < `parse_concat` < `parse_additive`
/// < `parse_multiplicative`). Used only to decide when `Display` must
/// parenthesize a child so it re-parses to the same tree.
fn binary_precedence(op: BinaryOperator) -> u8 {
    use BinaryOperator::*;
    match op {
        Equal | NotEqual | LessThan | GreaterThan | LessEqual | GreaterEqual => 1,
        Concat => 2,
        Add | Subtract => 3,
        Multiply | Divide => 4,
    }
}

/// Writes `child` as an operand of a binary operator at `parent_prec`,
/// wrapping it in parentheses if rendering it bare would change how it
/// re-parses. A strictly looser-binding child always needs them; a
/// same-precedence child on the right needs them too, since the grammar is
/// left-associative (`1-2-3` parses as `(1-2)-3`) — without the parens a
/// genuine `1-(2-3)` would silently reconstruct as `1-2-3` and re-parse to
/// the wrong value.
fn fmt_binary_operand(
    f: &mut fmt::Formatter<'_>,
    child: &Expression,
    parent_prec: u8,
    is_right: bool,
) -> fmt::Result {
    let needs_parens = match child {
        Expression::BinaryOp { op, .. } => {
            let child_prec = binary_precedence(*op);
            child_prec < parent_prec || (is_right && child_prec == parent_prec)
        }
        _ => false,
    };
    if needs_parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

/// A unary operator's operand only ever reaches here as a `BinaryOp` when
/// the source wrote explicit grouping parens around it (the parser's own
/// recursive descent never lets `-`/`+` swallow an unparenthesized binary
/// expression) — so any `BinaryOp` operand needs its parens kept.
fn fmt_unary_operand(f: &mut fmt::Formatter<'_>, operand: &Expression) -> fmt::Result {
    match operand {
        Expression::BinaryOp { .. } => write!(f, "({})", operand),
        _ => write!(f, "{}", operand),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Reference(r) => write!(f, "{}", r),
            Expression::Range { sheet, start, end } => {
                if let Some(sheet) = sheet {
                    write!(f, "{}!", format_sheet_name(sheet))?;
                }
                fmt_loc_part(f, &start.0, start.1, start.2, start.3)?;
                write!(f, ":")?;
                fmt_loc_part(f, &end.0, end.1, end.2, end.3)
            }
            Expression::BinaryOp { left, op, right } => {
                let prec = binary_precedence(*op);
                fmt_binary_operand(f, left, prec, false)?;
                write!(f, "{}", op)?;
                fmt_binary_operand(f, right, prec, true)
            }
            Expression::UnaryOp { op, operand } => {
                write!(f, "{}", op)?;
                fmt_unary_operand(f, operand)
            }
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Renders a parsed formula body back to canonical text, with the leading
/// `=` the grammar strips on the way in.
pub fn reconstruct(expr: &Expression) -> String {
    format!("={}", expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sheet_name_rule() {
        assert!(is_bare_sheet_name("Sheet1"));
        assert!(is_bare_sheet_name("_private"));
        assert!(!is_bare_sheet_name("Sheet 1"));
        assert!(!is_bare_sheet_name("1Sheet"));
        assert!(!is_bare_sheet_name(""));
    }

    #[test]
    fn format_sheet_name_quotes_when_needed() {
        assert_eq!(format_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(format_sheet_name("My Sheet"), "'My Sheet'");
        assert_eq!(format_sheet_name("O'Brien"), "'O''Brien'");
    }

    fn round_trip(src: &str) -> String {
        crate::parser::parse(src).unwrap().to_string()
    }

    #[test]
    fn grouped_sum_keeps_its_parens_through_a_tighter_parent() {
        assert_eq!(round_trip("(1+2)*3"), "(1+2)*3");
    }

    #[test]
    fn left_leaning_subtraction_chain_needs_no_extra_parens() {
        assert_eq!(round_trip("1-2-3"), "1-2-3");
    }

    #[test]
    fn right_nested_subtraction_keeps_its_parens() {
        assert_eq!(round_trip("1-(2-3)"), "1-(2-3)");
    }

    #[test]
    fn higher_precedence_child_never_gets_parens() {
        assert_eq!(round_trip("1+2*3"), "1+2*3");
    }

    #[test]
    fn negated_sum_keeps_its_parens() {
        assert_eq!(round_trip("-(1+2)"), "-(1+2)");
    }
}
