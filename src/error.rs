use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a PDF into page text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Could not open {path}: {reason}")]
    FileAccess { path: PathBuf, reason: String },

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the external text-generation service.
///
/// Malformed model output is not an error; see `Classification::unparsed`.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,

    #[error("Classification service error: {0}")]
    ExternalService(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("A classification for '{0}' already exists")]
    UniqueConstraintViolation(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one file inside a batch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Classify(#[from] ClassifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Could not write result file: {0}")]
    Output(String),

    #[error("Could not read input directory {path}: {reason}")]
    InputDir { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX export failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
