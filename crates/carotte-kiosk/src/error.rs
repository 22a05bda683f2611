use carotte_card::{BusinessError, CardError};
use carotte_common::{ErrorCategory, StudentId};
use carotte_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KioskError {
    #[error(transparent)]
    Card(#[from] CardError),

    /// The ledger failed before anything moved on the card.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("no bonus waiting for student {0}")]
    NoBonusAvailable(StudentId),

    #[error("student {0} is not registered in the ledger")]
    UnknownStudent(StudentId),

    #[error("unknown product {0:?}")]
    UnknownProduct(String),

    /// Initial balance is only for fresh cards.
    #[error("card already holds {balance_cents} cents")]
    BalanceNotEmpty { balance_cents: u16 },

    #[error("card worker has stopped")]
    WorkerStopped,
}

impl KioskError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            KioskError::Card(e) => e.category(),
            KioskError::Ledger(_) => ErrorCategory::Ledger,
            KioskError::NoBonusAvailable(_)
            | KioskError::UnknownStudent(_)
            | KioskError::UnknownProduct(_)
            | KioskError::BalanceNotEmpty { .. } => ErrorCategory::Business,
            KioskError::WorkerStopped => ErrorCategory::Transport,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            KioskError::Card(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<BusinessError> for KioskError {
    fn from(err: BusinessError) -> Self {
        KioskError::Card(err.into())
    }
}
