//! Error types for the document store

use thiserror::Error;

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("write conflict on collection '{0}', transaction aborted")]
    WriteConflict(String),

    #[error("no transaction is active on session {0}")]
    NoActiveTransaction(u64),

    #[error("transaction {0} already in progress on this session")]
    TransactionInProgress(u64),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("type mismatch for '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("stored function '{0}' not found")]
    FunctionNotFound(String),

    #[error("stored function '{name}' failed: {reason}")]
    FunctionFailed { name: String, reason: String },

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("write-ahead log error: {0}")]
    Wal(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl DbError {
    /// True for errors a caller may resolve by retrying the whole transaction
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::WriteConflict(_))
    }

    pub(crate) fn type_mismatch(field: &str, expected: &str, got: &crate::types::Value) -> Self {
        DbError::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
