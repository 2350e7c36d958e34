//! FILENAME: engine/src/literal.rs
//! C4: classifies raw cell contents into the post-edit cell state, before
//! any parsing or dependency wiring happens.

use crate::error::ErrorKind;
use crate::value::{parse_decimal_str, CellValue};
use parser::{parse, Expression};
use rust_decimal::Decimal;

/// The classification of a cell's raw contents, prior to evaluation.
#[derive(Debug, Clone)]
pub enum ClassifiedContents {
    Empty,
    /// A leading `'` was stripped; the remainder is taken verbatim.
    Text(String),
    /// A leading `=` introduced a formula; the tree parsed successfully.
    Formula(Expression),
    /// A leading `=` introduced a formula that failed to parse.
    ParseError,
    Error(ErrorKind),
    Number(Decimal),
    Bool(bool),
    PlainText(String),
}

/// Classifies `raw` per the literal rules (§4.4). `raw` is the contents as
/// the caller typed them, with no trimming applied yet by the caller.
pub fn classify(raw: &str) -> ClassifiedContents {
    if raw.trim().is_empty() {
        return ClassifiedContents::Empty;
    }

    let left_trimmed = raw.trim_start();
    if let Some(rest) = left_trimmed.strip_prefix('\'') {
        return ClassifiedContents::Text(rest.to_string());
    }

    if let Some(body) = left_trimmed.strip_prefix('=') {
        return match parse(body) {
            Ok(expr) => ClassifiedContents::Formula(expr),
            Err(_) => ClassifiedContents::ParseError,
        };
    }

    let trimmed = raw.trim();
    if let Some(kind) = ErrorKind::from_literal(trimmed) {
        return ClassifiedContents::Error(kind);
    }

    if let Some(d) = parse_decimal_str(trimmed) {
        return ClassifiedContents::Number(d);
    }

    match trimmed.to_ascii_uppercase().as_str() {
        "TRUE" => return ClassifiedContents::Bool(true),
        "FALSE" => return ClassifiedContents::Bool(false),
        _ => {}
    }

    ClassifiedContents::PlainText(trimmed.to_string())
}

/// Converts a non-formula classification directly to its resting
/// `CellValue`; formula classifications are handled by the evaluator
/// instead and have no direct value here.
pub fn literal_value(classified: &ClassifiedContents) -> Option<CellValue> {
    match classified {
        ClassifiedContents::Empty => Some(CellValue::Empty),
        ClassifiedContents::Text(s) => Some(CellValue::Text(s.clone())),
        ClassifiedContents::PlainText(s) => Some(CellValue::Text(s.clone())),
        ClassifiedContents::Number(d) => Some(CellValue::number(*d)),
        ClassifiedContents::Bool(b) => Some(CellValue::Bool(*b)),
        ClassifiedContents::Error(k) => Some(CellValue::Error(crate::error::CellError::new(*k))),
        ClassifiedContents::Formula(_) | ClassifiedContents::ParseError => None,
    }
}
