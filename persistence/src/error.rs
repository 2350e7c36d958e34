//! FILENAME: persistence/src/error.rs
//! Host-facing exceptions for the JSON workbook format (§6, §7): decode
//! failures, missing/mistyped wire fields, and propagated `WorkbookError`s
//! raised while replaying a loaded document's edits.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error(transparent)]
    Workbook(#[from] engine::error::WorkbookError),
}
