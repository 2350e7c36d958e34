//! FILENAME: parser/src/tests.rs
//! PURPOSE: Consolidated unit tests for the parser crate.

use crate::ast::{is_bare_sheet_name, is_error_literal, BinaryOperator, Expression, Value};
use crate::lexer::Lexer;
use crate::parser::parse;
use crate::token::Token;

// ========================================
// LEXER TESTS
// ========================================

#[test]
fn test_exclamation_token() {
    let mut lexer = Lexer::new("Sheet1!A1");
    assert_eq!(lexer.next_token(), Token::Identifier("Sheet1".to_string()));
    assert_eq!(lexer.next_token(), Token::Exclamation);
    assert_eq!(lexer.next_token(), Token::Identifier("A1".to_string()));
}

#[test]
fn test_quoted_identifier() {
    let mut lexer = Lexer::new("'My Sheet'!A1");
    assert_eq!(
        lexer.next_token(),
        Token::QuotedIdentifier("My Sheet".to_string())
    );
    assert_eq!(lexer.next_token(), Token::Exclamation);
    assert_eq!(lexer.next_token(), Token::Identifier("A1".to_string()));
}

#[test]
fn test_quoted_identifier_with_escaped_quote() {
    let mut lexer = Lexer::new("'John''s Sheet'!A1");
    assert_eq!(
        lexer.next_token(),
        Token::QuotedIdentifier("John's Sheet".to_string())
    );
    assert_eq!(lexer.next_token(), Token::Exclamation);
}

#[test]
fn lexer_tokenizes_simple_math() {
    let mut lexer = Lexer::new("1 + 2");

    assert_eq!(lexer.next_token(), Token::Number("1".to_string()));
    assert_eq!(lexer.next_token(), Token::Plus);
    assert_eq!(lexer.next_token(), Token::Number("2".to_string()));
    assert_eq!(lexer.next_token(), Token::EOF);
}

#[test]
fn lexer_tokenizes_functions() {
    let mut lexer = Lexer::new("SUM(A1, 10)");

    assert_eq!(lexer.next_token(), Token::Identifier("SUM".to_string()));
    assert_eq!(lexer.next_token(), Token::LParen);
    assert_eq!(lexer.next_token(), Token::Identifier("A1".to_string()));
    assert_eq!(lexer.next_token(), Token::Comma);
    assert_eq!(lexer.next_token(), Token::Number("10".to_string()));
    assert_eq!(lexer.next_token(), Token::RParen);
}

#[test]
fn lexer_preserves_identifier_case() {
    let mut lexer = Lexer::new("a1");
    assert_eq!(lexer.next_token(), Token::Identifier("a1".to_string()));
}

#[test]
fn lexer_matches_boolean_keywords_case_insensitively() {
    let mut lexer = Lexer::new("true FALSE");
    assert_eq!(lexer.next_token(), Token::Boolean(true));
    assert_eq!(lexer.next_token(), Token::Boolean(false));
}

#[test]
fn lexer_equals_and_double_equals_are_synonyms() {
    let mut first = Lexer::new("=");
    let mut second = Lexer::new("==");
    assert_eq!(first.next_token(), Token::Equals);
    assert_eq!(second.next_token(), Token::Equals);
}

#[test]
fn lexer_not_equal_and_bang_equal_are_synonyms() {
    let mut first = Lexer::new("<>");
    let mut second = Lexer::new("!=");
    assert_eq!(first.next_token(), Token::NotEqual);
    assert_eq!(second.next_token(), Token::NotEqual);
}

#[test]
fn lexer_reads_error_literal() {
    let mut lexer = Lexer::new("#DIV/0! + 1");
    assert_eq!(lexer.next_token(), Token::ErrorLiteral("#DIV/0!".to_string()));
    assert_eq!(lexer.next_token(), Token::Plus);
}

#[test]
fn lexer_reads_escaped_string() {
    let mut lexer = Lexer::new(r#""a\"b""#);
    assert_eq!(lexer.next_token(), Token::String("a\"b".to_string()));
}

// ========================================
// AST HELPERS
// ========================================

#[test]
fn bare_sheet_name_rule() {
    assert!(is_bare_sheet_name("Sheet1"));
    assert!(!is_bare_sheet_name("Sheet 1"));
}

#[test]
fn error_literal_membership_is_case_insensitive() {
    assert!(is_error_literal("#ref!"));
    assert!(is_error_literal("#REF!"));
    assert!(!is_error_literal("#NOPE!"));
}

// ========================================
// PARSER TESTS
// ========================================

#[test]
fn parses_arithmetic_precedence() {
    let expr = parse("1+2*3-4/2").unwrap();
    assert_eq!(expr.to_string(), "1+2*3-4/2");
}

#[test]
fn parses_unary_minus_binds_tighter_than_binary() {
    let expr = parse("-1+2").unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Add, .. } => {}
        _ => panic!("expected addition at the top"),
    }
}

#[test]
fn concat_binds_looser_than_additive() {
    let expr = parse(r#"1+1&"x""#).unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Concat, .. } => {}
        _ => panic!("expected concat at the top"),
    }
}

#[test]
fn comparison_binds_loosest() {
    let expr = parse(r#"1&"a"="1a""#).unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Equal, .. } => {}
        _ => panic!("expected comparison at the top"),
    }
}

#[test]
fn parses_absolute_references_and_preserves_case() {
    let expr = parse("$a1+$b1").unwrap();
    assert_eq!(expr.to_string(), "$a1+$b1");
}

#[test]
fn parses_range_reference() {
    let expr = parse("A1:B10").unwrap();
    assert_eq!(expr.to_string(), "A1:B10");
}

#[test]
fn parses_sheet_qualified_range() {
    let expr = parse("Sheet2!A1:B10").unwrap();
    assert_eq!(expr.to_string(), "Sheet2!A1:B10");
}

#[test]
fn quoted_sheet_name_round_trips_with_quoting_when_needed() {
    let expr = parse("'Sheet 2'!A1").unwrap();
    assert_eq!(expr.to_string(), "'Sheet 2'!A1");
}

#[test]
fn parses_nested_function_calls() {
    let expr = parse("IF(A1>0,SUM(B1:B2),0)").unwrap();
    assert_eq!(expr.to_string(), "IF(A1>0,SUM(B1:B2),0)");
}

#[test]
fn parses_boolean_and_text_literals() {
    let expr = parse(r#"IF(TRUE,"yes","no")"#).unwrap();
    assert_eq!(expr.to_string(), r#"IF(TRUE,"yes","no")"#);
}

#[test]
fn rejects_power_operator() {
    assert!(parse("2^3").is_err());
}

#[test]
fn rejects_trailing_garbage() {
    assert!(parse("1+1)").is_err());
}

#[test]
fn rejects_empty_input() {
    assert!(parse("").is_err());
}

#[test]
fn error_literal_parses_as_value_literal() {
    let expr = parse("#REF!").unwrap();
    match expr {
        Expression::Literal(Value::Error(s)) => assert_eq!(s, "#REF!"),
        _ => panic!("expected an error literal"),
    }
}
