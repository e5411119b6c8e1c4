//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required external tool not installed
    #[error("Required tool not available: {0}")]
    MissingTool(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// No part category survived classification
    #[error("No part category classified for '{filename}'")]
    NoCategory { filename: String },

    /// Required field absent after the full fallback chain
    #[error("Required field '{field}' not found in '{filename}'")]
    FieldMissing { filename: String, field: String },

    /// Monthly page quota would be met or exceeded
    #[error("Page quota exceeded for period {period}: {consumed} consumed + {requested} requested reaches cap {cap}")]
    QuotaExceeded {
        period: String,
        consumed: u32,
        requested: u32,
        cap: u32,
    },

    /// Extraction job reported a failed status
    #[error("Extraction job failed for '{key}': {message}")]
    JobFailed { key: String, message: String },

    /// Consecutive poll failures exhausted the retry budget
    #[error("Gave up polling job for '{key}' after {attempts} consecutive failures")]
    PollExhausted { key: String, attempts: u32 },

    /// Overall job deadline elapsed before a terminal status
    #[error("Extraction job for '{key}' exceeded its deadline")]
    JobTimeout { key: String },

    /// Local OCR failure
    #[error("OCR error: {0}")]
    Ocr(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a missing-field error
    pub fn field_missing(filename: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldMissing {
            filename: filename.into(),
            field: field.into(),
        }
    }

    /// Create an OCR error
    pub fn ocr(message: impl Into<String>) -> Self {
        Self::Ocr(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Contract errors stop the worker instead of skipping the document.
    ///
    /// Everything else is fatal for the current document only: the worker
    /// logs it and moves on to the next queue item.
    pub fn is_contract(&self) -> bool {
        matches!(self, Error::Config(_) | Error::MissingTool(_))
    }
}
