use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CerebrumError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Too many rows: {0}")]
    TooManyRows(String),
    #[error("Programming error: {0}")]
    ProgrammingError(String),
    #[error("Integrity error: {0}")]
    IntegrityError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Queue full: {0}")]
    QueueFull(String),
}

impl CerebrumError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CerebrumError::NotFound(_))
    }

    /// Short variant label, used when counting failures by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CerebrumError::RusqliteError(_) => "RusqliteError",
            CerebrumError::IoError(_) => "IoError",
            CerebrumError::JsonError(_) => "JsonError",
            CerebrumError::ConfigError(_) => "ConfigError",
            CerebrumError::NotFound(_) => "NotFound",
            CerebrumError::TooManyRows(_) => "TooManyRows",
            CerebrumError::ProgrammingError(_) => "ProgrammingError",
            CerebrumError::IntegrityError(_) => "IntegrityError",
            CerebrumError::ValidationError(_) => "ValidationError",
            CerebrumError::QueueFull(_) => "QueueFull",
        }
    }
}
