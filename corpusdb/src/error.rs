use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },

    #[error("Dimension mismatch in '{namespace}': expected {expected}, got {got}")]
    DimensionMismatch {
        namespace: String,
        expected: usize,
        got: usize,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Substrate error: {0}")]
    Substrate(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CorpusError {
    /// Substrate-level failures are worth a bounded retry; everything else is not.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            CorpusError::Substrate(_) | CorpusError::Sqlite(_) | CorpusError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CorpusError>;
