//! Error types at the extractor boundary.

use thiserror::Error;

/// Errors an extractor can report for a single file.
///
/// None of these abort a run; the dispatcher logs them and records the file as
/// not extracted.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid XML: {0}")]
    Xml(String),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required metadata: {0}")]
    MissingMetadata(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Command execution failed: {0}")]
    Command(String),

    #[error("Failed to describe content file: {0:#}")]
    Media(anyhow::Error),

    #[error("No extractor for category: {0}")]
    Unsupported(String),
}

impl From<quick_xml::Error> for ExtractionError {
    fn from(e: quick_xml::Error) -> Self {
        ExtractionError::Xml(e.to_string())
    }
}

/// Result type for extractor operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractionError>;
