//! Import of rows from the comment-tagged legacy ledger
//!
//! The legacy schema marked bonus rows with a comment starting with "Bonus"
//! and paid-out rows by appending " (transféré)". Both markers become flags
//! here, selected with the same case-insensitive `LIKE` predicates.

use carotte_common::StudentId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::client::EntryKind;

/// A row as exported from the legacy `Transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntry {
    pub student_id: StudentId,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub comment: String,
    pub timestamp_ns: u64,
}

/// Flags derived from a legacy comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyFlags {
    pub bonus: bool,
    pub transferred: bool,
}

const BONUS_PREFIX: &str = "bonus";
const TRANSFER_MARKERS: [&str; 2] = ["transféré", "transferred"];

/// `comment LIKE 'Bonus%'` and `comment LIKE '%transféré%'`.
pub fn classify_comment(comment: &str) -> LegacyFlags {
    let lowered = comment.to_lowercase();
    LegacyFlags {
        bonus: lowered.starts_with(BONUS_PREFIX),
        transferred: TRANSFER_MARKERS.iter().any(|m| lowered.contains(m)),
    }
}

impl LegacyEntry {
    /// Only CREDIT rows can be bonuses; a transferred marker on anything
    /// else is meaningless.
    pub fn flags(&self) -> LegacyFlags {
        let flags = classify_comment(&self.comment);
        let bonus = flags.bonus && self.kind == EntryKind::Credit;
        LegacyFlags {
            bonus,
            transferred: bonus && flags.transferred,
        }
    }
}
