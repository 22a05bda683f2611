//! Reconciliation of card mutations with the ledger
//!
//! Every flow moves value on the card first and writes the ledger only after
//! the card committed. A ledger failure after that point is reported as
//! [`Reconciled::LedgerWriteFailed`]: the card outcome stands, an incident is
//! queued for an operator, and nothing is reversed or retried.

use std::sync::Arc;

use carotte_card::{BusinessError, CardLink, MutationReceipt, StudentCard};
use carotte_common::{from_minor_units, to_minor_units, PersonalizationRecord, StudentId};
use carotte_ledger::{BonusBatch, LedgerClient};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::Product;
use crate::error::KioskError;
use crate::escalation::{raise, Incident, IncidentKind, OperatorQueue};

/// Starting amount credited by [`Coordinator::initial_balance`] when the
/// caller does not pick one.
pub const DEFAULT_INITIAL_BALANCE_CENTS: u16 = 100;

const INITIAL_BALANCE_COMMENT: &str = "Solde initial";

/// Result of a flow whose card side committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled<T> {
    Settled(T),
    /// The card moved the money but the ledger did not record it.
    LedgerWriteFailed { outcome: T, incident: Incident },
}

impl<T> Reconciled<T> {
    pub fn outcome(&self) -> &T {
        match self {
            Reconciled::Settled(outcome) | Reconciled::LedgerWriteFailed { outcome, .. } => outcome,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Reconciled::Settled(_))
    }

    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Reconciled::Settled(_) => None,
            Reconciled::LedgerWriteFailed { incident, .. } => Some(incident),
        }
    }

    pub fn into_outcome(self) -> T {
        match self {
            Reconciled::Settled(outcome) | Reconciled::LedgerWriteFailed { outcome, .. } => outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopUpOutcome {
    pub student_id: StudentId,
    pub amount: Decimal,
    pub receipt: MutationReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOutcome {
    pub student_id: StudentId,
    pub product: Product,
    pub receipt: MutationReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusTransferOutcome {
    pub student_id: StudentId,
    pub amount: Decimal,
    pub receipt: MutationReceipt,
    /// Ledger rows flagged transferred by this call.
    pub transferred_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialBalanceOutcome {
    pub student_id: StudentId,
    pub amount: Decimal,
    pub receipt: MutationReceipt,
}

/// What the kiosk shows after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardBalance {
    pub holder: PersonalizationRecord,
    pub balance_cents: u16,
    /// `None` when the ledger could not be asked.
    pub pending_bonus: Option<Decimal>,
}

/// Runs the user-visible flows of one terminal.
#[derive(Clone)]
pub struct Coordinator {
    ledger: Arc<dyn LedgerClient>,
    operators: Arc<dyn OperatorQueue>,
    terminal: String,
}

impl Coordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        operators: Arc<dyn OperatorQueue>,
        terminal: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            operators,
            terminal: terminal.into(),
        }
    }

    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn operators(&self) -> &Arc<dyn OperatorQueue> {
        &self.operators
    }

    /// Card balance plus the bonus waiting in the ledger. Read-only on both sides.
    pub fn balance<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
        pin: &str,
    ) -> Result<CardBalance, KioskError> {
        let holder = card.resolve_student()?;
        let balance_cents = card.balance_with_pin(pin)?;
        let pending_bonus = match self.ledger.bonus_total(&holder.student_id) {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(student = %holder.student_id, error = %e, "Bonus lookup failed");
                None
            }
        };
        Ok(CardBalance {
            holder,
            balance_cents,
            pending_bonus,
        })
    }

    /// Credit the card with a paid amount, then record it in the ledger.
    pub fn top_up<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
        pin: &str,
        amount: Decimal,
    ) -> Result<Reconciled<TopUpOutcome>, KioskError> {
        let cents = to_minor_units(amount).map_err(BusinessError::from)?;
        let student_id = self.registered_student(card)?;

        let receipt = card.credit_cents(pin, cents)?;
        let amount = from_minor_units(cents);
        info!(student = %student_id, %amount, counter = receipt.counter, "Card topped up");

        let outcome = TopUpOutcome {
            student_id,
            amount,
            receipt,
        };
        let comment = format!("Recharge CB {}", self.terminal);
        match self.ledger.credit_ledger(&outcome.student_id, amount, &comment) {
            Ok(entry) => {
                info!(student = %outcome.student_id, entry, "Top-up recorded");
                Ok(Reconciled::Settled(outcome))
            }
            Err(e) => {
                let incident = self.incident(
                    IncidentKind::TopUp,
                    &outcome.student_id,
                    amount,
                    &receipt,
                    e.to_string(),
                );
                Ok(Reconciled::LedgerWriteFailed { outcome, incident })
            }
        }
    }

    /// Debit the card for one product, then record the sale.
    ///
    /// The balance is checked before the debit so an insufficient balance
    /// never consumes a counter value.
    pub fn purchase<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
        pin: &str,
        product: &Product,
    ) -> Result<Reconciled<PurchaseOutcome>, KioskError> {
        if product.price_cents == 0 {
            return Err(BusinessError::InvalidAmount(carotte_common::AmountError::NotPositive).into());
        }
        let student_id = self.registered_student(card)?;

        let balance = card.balance_with_pin(pin)?;
        if balance < product.price_cents {
            info!(
                student = %student_id,
                balance,
                price = product.price_cents,
                "Balance too low for purchase"
            );
            return Err(BusinessError::InsufficientBalance.into());
        }

        let receipt = card.debit_cents(pin, product.price_cents)?;
        let amount = from_minor_units(product.price_cents);
        info!(student = %student_id, product = %product.id, counter = receipt.counter, "Product sold");

        let outcome = PurchaseOutcome {
            student_id,
            product: product.clone(),
            receipt,
        };
        let comment = format!("{}: {}", self.terminal, product.name);
        match self.ledger.record_debit(&outcome.student_id, amount, &comment) {
            Ok(entry) => {
                info!(student = %outcome.student_id, entry, "Sale recorded");
                Ok(Reconciled::Settled(outcome))
            }
            Err(e) => {
                let incident = self.incident(
                    IncidentKind::Purchase,
                    &outcome.student_id,
                    amount,
                    &receipt,
                    e.to_string(),
                );
                Ok(Reconciled::LedgerWriteFailed { outcome, incident })
            }
        }
    }

    /// Move every pending bonus row onto the card.
    ///
    /// Rows are marked transferred only after the card credit committed, and
    /// only the rows that made up the credited total.
    pub fn transfer_bonus<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
        pin: &str,
    ) -> Result<Reconciled<BonusTransferOutcome>, KioskError> {
        let record = card.resolve_student()?;
        let student_id = record.student_id;

        let batch = self.ledger.pending_bonus(&student_id)?;
        if batch.is_empty() {
            info!(student = %student_id, "No bonus to transfer");
            return Err(KioskError::NoBonusAvailable(student_id));
        }
        let cents = to_minor_units(batch.total).map_err(BusinessError::from)?;

        let receipt = card.credit_cents(pin, cents)?;
        info!(
            student = %student_id,
            amount = %batch.total,
            rows = batch.entry_ids.len(),
            counter = receipt.counter,
            "Bonus credited to card"
        );

        let mut outcome = BonusTransferOutcome {
            student_id,
            amount: batch.total,
            receipt,
            transferred_count: 0,
        };
        match self.ledger.mark_bonus_batch_transferred(&batch) {
            Ok(count) if count == batch.entry_ids.len() => {
                outcome.transferred_count = count;
                info!(student = %outcome.student_id, count, "Bonus rows marked transferred");
                Ok(Reconciled::Settled(outcome))
            }
            Ok(count) => {
                outcome.transferred_count = count;
                let incident = self.incident(
                    IncidentKind::BonusTransfer,
                    &outcome.student_id,
                    batch.total,
                    &receipt,
                    describe_partial_mark(&batch, count),
                );
                Ok(Reconciled::LedgerWriteFailed { outcome, incident })
            }
            Err(e) => {
                let incident = self.incident(
                    IncidentKind::BonusTransfer,
                    &outcome.student_id,
                    batch.total,
                    &receipt,
                    e.to_string(),
                );
                Ok(Reconciled::LedgerWriteFailed { outcome, incident })
            }
        }
    }

    /// Credit a freshly personalized card with its starting amount.
    pub fn initial_balance<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
        pin: &str,
        amount_cents: u16,
    ) -> Result<Reconciled<InitialBalanceOutcome>, KioskError> {
        if amount_cents == 0 {
            return Err(BusinessError::InvalidAmount(carotte_common::AmountError::NotPositive).into());
        }
        let student_id = self.registered_student(card)?;

        let balance = card.balance_with_pin(pin)?;
        if balance != 0 {
            warn!(student = %student_id, balance, "Initial balance refused on a used card");
            return Err(KioskError::BalanceNotEmpty {
                balance_cents: balance,
            });
        }

        let receipt = card.credit_cents(pin, amount_cents)?;
        let amount = from_minor_units(amount_cents);
        info!(student = %student_id, %amount, "Initial balance credited");

        let outcome = InitialBalanceOutcome {
            student_id,
            amount,
            receipt,
        };
        match self
            .ledger
            .credit_ledger(&outcome.student_id, amount, INITIAL_BALANCE_COMMENT)
        {
            Ok(_) => Ok(Reconciled::Settled(outcome)),
            Err(e) => {
                let incident = self.incident(
                    IncidentKind::InitialBalance,
                    &outcome.student_id,
                    amount,
                    &receipt,
                    e.to_string(),
                );
                Ok(Reconciled::LedgerWriteFailed { outcome, incident })
            }
        }
    }

    /// Student on the card, checked against the ledger before any value moves.
    fn registered_student<L: CardLink>(
        &self,
        card: &mut StudentCard<L>,
    ) -> Result<StudentId, KioskError> {
        let record = card.resolve_student()?;
        if !self.ledger.student_exists(&record.student_id)? {
            warn!(student = %record.student_id, "Card holder has no ledger account");
            return Err(KioskError::UnknownStudent(record.student_id));
        }
        Ok(record.student_id)
    }

    fn incident(
        &self,
        kind: IncidentKind,
        student_id: &StudentId,
        amount: Decimal,
        receipt: &MutationReceipt,
        detail: String,
    ) -> Incident {
        let incident = Incident::new(
            kind,
            student_id.clone(),
            amount,
            receipt.counter,
            self.terminal.clone(),
            detail,
        );
        raise(self.operators.as_ref(), &incident);
        incident
    }
}

fn describe_partial_mark(batch: &BonusBatch, marked: usize) -> String {
    let ids = batch
        .entry_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "marked {marked} of {} bonus rows transferred (rows {ids})",
        batch.entry_ids.len()
    )
}
