//! Carotte Ledger - Server-side record of every balance change
//!
//! The card holds the money; the ledger holds the accounting. The
//! [`LedgerClient`] trait is what the kiosks consume, [`SqliteLedger`] is the
//! implementation they ship with.

pub mod client;
pub mod error;
pub mod legacy;
pub mod sqlite;

pub use client::{AccountSummary, BonusBatch, EntryId, EntryKind, LedgerClient, LedgerEntry};
pub use error::LedgerError;
pub use legacy::{classify_comment, LegacyEntry, LegacyFlags};
pub use sqlite::SqliteLedger;
