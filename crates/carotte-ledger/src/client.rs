//! The ledger operations the kiosks depend on

use carotte_common::StudentId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

pub type EntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "CREDIT",
            EntryKind::Debit => "DEBIT",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "CREDIT" => Some(EntryKind::Credit),
            "DEBIT" => Some(EntryKind::Debit),
            _ => None,
        }
    }
}

/// One row of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub student_id: StudentId,
    /// Always positive; the direction is in `kind`.
    pub amount: Decimal,
    pub kind: EntryKind,
    pub comment: String,
    pub bonus: bool,
    pub transferred: bool,
    pub timestamp_ns: u64,
}

/// Untransferred bonus rows for one student, summed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusBatch {
    pub student_id: StudentId,
    pub entry_ids: Vec<EntryId>,
    pub total: Decimal,
}

impl BonusBatch {
    pub fn is_empty(&self) -> bool {
        self.entry_ids.is_empty() || self.total <= Decimal::ZERO
    }
}

/// A student with the ledger-side balance of their account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub student_id: StudentId,
    pub last_name: String,
    pub first_name: String,
    pub balance: Decimal,
}

/// Server-side transaction log keyed by student.
///
/// Implementations must make [`mark_bonus_batch_transferred`] and
/// [`mark_bonus_transferred`] at-most-once per row: the returned count is the
/// number of rows this call flipped, so a concurrent second call sees 0.
///
/// [`mark_bonus_batch_transferred`]: LedgerClient::mark_bonus_batch_transferred
/// [`mark_bonus_transferred`]: LedgerClient::mark_bonus_transferred
pub trait LedgerClient: Send + Sync {
    fn student_exists(&self, student: &StudentId) -> Result<bool, LedgerError>;

    /// Append a CREDIT row and raise the account balance.
    fn credit_ledger(
        &self,
        student: &StudentId,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError>;

    /// Append a DEBIT row and lower the account balance.
    fn record_debit(
        &self,
        student: &StudentId,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError>;

    /// The rows [`bonus_total`](LedgerClient::bonus_total) sums, with their ids.
    fn pending_bonus(&self, student: &StudentId) -> Result<BonusBatch, LedgerError>;

    /// Sum of CREDIT rows flagged bonus and not yet transferred.
    fn bonus_total(&self, student: &StudentId) -> Result<Decimal, LedgerError> {
        Ok(self.pending_bonus(student)?.total)
    }

    /// Flag every pending bonus row of `student` as transferred.
    fn mark_bonus_transferred(&self, student: &StudentId) -> Result<usize, LedgerError>;

    /// Flag exactly the rows of `batch` that are still pending.
    fn mark_bonus_batch_transferred(&self, batch: &BonusBatch) -> Result<usize, LedgerError>;
}
