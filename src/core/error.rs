//! Error taxonomy shared by the store, tag manager, pipeline and
//! multi-language engine

use miette::Diagnostic;
use thiserror::Error;

/// Result alias for store-level operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by engine operations
///
/// Transactional operations return exactly one of these after rolling back.
/// Batch operations (import, export) collect per-item failures in their
/// reports instead and only return an error when the whole batch failed.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    #[diagnostic(code(cvdb::not_found))]
    NotFound { kind: &'static str, key: String },

    #[error("conflict: {0}")]
    #[diagnostic(code(cvdb::conflict))]
    Conflict(String),

    #[error("integrity error: {0}")]
    #[diagnostic(
        code(cvdb::integrity),
        help("run `cvdb doctor` to list entries with invalid payloads")
    )]
    Integrity(String),

    #[error("validation error: {0}")]
    #[diagnostic(code(cvdb::validation))]
    Validation(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(cvdb::storage))]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(cvdb::io))]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// True when SQLite reported the database as locked by another writer
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StoreError::Storage(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Integrity(err.to_string())
    }
}
