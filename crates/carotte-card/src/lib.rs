//! Carotte Card - Talking to the stored-value student card
//!
//! This crate moves APDUs over PC/SC (or to a [`simulator::SimulatedCard`]),
//! frames the card's commands including the `6Cxx` length-retry rule, and
//! runs the PIN / anti-replay counter / value mutation sequence in
//! [`protocol::StudentCard`].

pub mod apdu;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod simulator;
pub mod terminal;

pub use error::{
    BusinessError, CardError, ErrorCategory, ProtocolError, SecurityError, TransportError,
};
pub use protocol::{Direction, MutationReceipt, PersonalizationLayout, StudentCard, TransactionState};
pub use reader::{CardLink, CardReader, CardSession, Connector, SessionState};
pub use simulator::{CardState, SimulatedCard, SimulatedReader};
pub use terminal::Terminal;
