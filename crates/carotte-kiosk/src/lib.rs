//! Carotte Kiosk - What a terminal does with a card and the ledger
//!
//! The [`Coordinator`] runs top-up, purchase, bonus transfer and initial
//! balance flows: card first, ledger second, and an operator [`Incident`]
//! whenever the two diverge. [`CardWorker`] gives each reader its own thread.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod escalation;
pub mod worker;

pub use config::{
    CardConfig, ConfigError, EscalationConfig, KioskConfig, LedgerConfig, Product,
    TerminalConfig, VendingConfig,
};
pub use coordinator::{
    BonusTransferOutcome, CardBalance, Coordinator, InitialBalanceOutcome, PurchaseOutcome,
    Reconciled, TopUpOutcome, DEFAULT_INITIAL_BALANCE_CENTS,
};
pub use error::KioskError;
pub use escalation::{
    EscalationError, Incident, IncidentKind, JsonlOperatorQueue, MemoryOperatorQueue,
    OperatorQueue,
};
pub use worker::{CardWorker, KioskEvent, KioskHandle};
