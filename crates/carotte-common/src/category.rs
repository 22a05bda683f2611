//! Error categories shared by every crate

use serde::Serialize;

/// Broad classification of a failure.
///
/// Transport and protocol errors abort the operation. Security and business
/// errors are expected outcomes for the user. Ledger errors mean the card and
/// the ledger may disagree and need an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Security,
    Business,
    Ledger,
}
