use carotte_common::{ErrorCategory, StudentId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown student {0}")]
    UnknownStudent(StudentId),

    #[error("student {0} is already registered")]
    DuplicateStudent(StudentId),

    #[error("ledger amounts must be strictly positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("amount {0} does not fit in the ledger")]
    AmountOutOfRange(Decimal),

    /// A stored row no longer matches the schema invariants.
    #[error("corrupt ledger row {id}: {details}")]
    Corrupt { id: i64, details: String },

    /// The ledger could not be reached at all.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Ledger
    }

    /// Ledger writes are never retried automatically.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
