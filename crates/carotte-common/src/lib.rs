//! Carotte Common - Shared value types for the student card kiosks
//!
//! Everything here is plain data with validation: nothing in this crate talks
//! to a card reader or a database. The card, ledger and kiosk crates all build
//! on these types so that an amount, a student id or a PIN means the same thing
//! on both sides of a reconciliation.

pub mod amount;
pub mod category;
pub mod credentials;
pub mod status;
pub mod student;

pub use amount::{
    format_cents, from_minor_units, parse_amount, round_to_cents, to_minor_units, AmountError,
};
pub use category::ErrorCategory;
pub use credentials::{CredentialError, Pin, Puk};
pub use status::{describe_status, StatusWord};
pub use student::{PersonalizationError, PersonalizationRecord, StudentId};
