//! Student card transaction engine
//!
//! [`StudentCard`] sequences PIN verification, counter read and value
//! mutation, and turns each command's status words into typed outcomes.
//!
//! The card's "PIN verified" flag is one-shot: reading the balance, crediting
//! and debiting all consume it. The engine mirrors that locally so a caller
//! that forgets to re-verify gets [`SecurityError::PinRequired`] without a
//! wasted exchange.

use carotte_common::{to_minor_units, Pin, PersonalizationRecord, Puk, StatusWord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::apdu::commands;
use crate::error::{BusinessError, CardError, ErrorCategory, ProtocolError, SecurityError};
use crate::reader::{CardLink, CardSession};

/// First guess for the personalization length; the card corrects it.
pub const PERSONALIZATION_LENGTH_GUESS: u8 = 5;

const WRONG_CREDENTIAL: u8 = 0x63;
const SW_SECURITY_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
const SW_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);
const SW_COUNTER_MISMATCH: StatusWord = StatusWord::new(0x69, 0x84);
const LIMIT_REACHED: u8 = 0x61;
const SW_CAPACITY_EXCEEDED: StatusWord = StatusWord::new(LIMIT_REACHED, 0x00);

/// Where a logical transaction currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    PinPending,
    PinVerified,
    CounterRead { counter: u16 },
    Committing,
    Committed,
    Rejected,
}

/// How the personalization read response is laid out.
///
/// Some reader drivers surface the T=0 procedure byte (the echoed INS) in
/// front of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonalizationLayout {
    #[default]
    Raw,
    EchoedInstruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

/// Proof that the card committed a value mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReceipt {
    pub direction: Direction,
    pub amount_cents: u16,
    /// Counter value consumed by the command.
    pub counter: u16,
}

/// Engine bound to one card session.
pub struct StudentCard<L> {
    session: CardSession<L>,
    state: TransactionState,
    pin_blocked: bool,
    layout: PersonalizationLayout,
}

impl<L: CardLink> StudentCard<L> {
    pub fn new(session: CardSession<L>, layout: PersonalizationLayout) -> Self {
        Self {
            session,
            state: TransactionState::Idle,
            pin_blocked: false,
            layout,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn session(&self) -> &CardSession<L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CardSession<L> {
        &mut self.session
    }

    /// Set once the card reports the PIN blocked; only a PUK reset clears it.
    pub fn is_pin_blocked(&self) -> bool {
        self.pin_blocked
    }

    /// Firmware version string, e.g. `"2.00"`.
    pub fn read_version(&mut self) -> Result<String, CardError> {
        let response = commands::version()
            .send_adjusting_length(&mut self.session)
            .map_err(|e| self.abort(e))?;
        if !response.is_success() {
            return Err(self.abort(ProtocolError::UnknownCardError { sw: response.sw }.into()));
        }
        Ok(String::from_utf8_lossy(&response.data).into_owned())
    }

    /// Returns `None` for an unassigned card.
    pub fn read_personalization(&mut self) -> Result<Option<PersonalizationRecord>, CardError> {
        let response = commands::read_personalization(PERSONALIZATION_LENGTH_GUESS)
            .send_adjusting_length(&mut self.session)
            .map_err(|e| self.abort(e))?;
        if !response.is_success() {
            return Err(self.abort(ProtocolError::UnknownCardError { sw: response.sw }.into()));
        }

        let payload = match self.layout {
            PersonalizationLayout::Raw => &response.data[..],
            PersonalizationLayout::EchoedInstruction => match response.data.split_first() {
                Some((&first, rest)) => {
                    if first != commands::INS_READ_PERSONALIZATION {
                        warn!(
                            byte = first,
                            "Expected an echoed instruction byte in front of personalization data"
                        );
                    }
                    rest
                }
                None => &[],
            },
        };

        PersonalizationRecord::decode(payload)
            .map_err(|e| self.abort(ProtocolError::MalformedPersonalization(e).into()))
    }

    /// Personalization, or [`BusinessError::CardUnassigned`].
    pub fn resolve_student(&mut self) -> Result<PersonalizationRecord, CardError> {
        self.read_personalization()?
            .ok_or_else(|| self.reject(BusinessError::CardUnassigned.into()))
    }

    /// Assign the card. The firmware resets PIN, counter and balance and
    /// derives a new PUK, which is returned.
    pub fn write_personalization(&mut self, record: &PersonalizationRecord) -> Result<Puk, CardError> {
        let payload = record
            .encode()
            .map_err(|e| self.reject(BusinessError::InvalidPersonalization(e).into()))?;
        let response = commands::write_personalization(payload.clone())
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;

        if let Some(max) = response.sw.corrected_length() {
            return Err(self.reject(BusinessError::PersonalizationTooLong { max }.into()));
        }
        if !response.is_success() {
            return Err(self.abort(ProtocolError::UnknownCardError { sw: response.sw }.into()));
        }

        self.pin_blocked = false;
        self.state = TransactionState::Idle;
        info!(student = %record.student_id, "Card personalized");
        Ok(Puk::derive_from_personalization(&payload))
    }

    pub fn verify_pin(&mut self, pin: &str) -> Result<(), CardError> {
        let pin = Pin::parse(pin).map_err(|e| self.reject(e.into()))?;
        if self.pin_blocked {
            return Err(self.reject(SecurityError::PinBlocked.into()));
        }

        self.state = TransactionState::PinPending;
        let response = commands::verify_pin(pin.to_bytes())
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;
        self.check_pin_outcome(response.sw)?;

        self.state = TransactionState::PinVerified;
        debug!("PIN verified");
        Ok(())
    }

    /// Change the PIN. Leaves the card without a verified PIN.
    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<(), CardError> {
        let old_pin = Pin::parse(old_pin).map_err(|e| self.reject(e.into()))?;
        let new_pin = Pin::parse(new_pin).map_err(|e| self.reject(e.into()))?;
        if self.pin_blocked {
            return Err(self.reject(SecurityError::PinBlocked.into()));
        }

        self.state = TransactionState::PinPending;
        let response = commands::change_pin(old_pin.to_bytes(), new_pin.to_bytes())
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;
        self.check_pin_outcome(response.sw)?;

        self.state = TransactionState::Idle;
        info!("PIN changed");
        Ok(())
    }

    /// Unblock the card with its PUK and set a new PIN.
    pub fn reset_pin_with_puk(&mut self, puk: &str, new_pin: &str) -> Result<(), CardError> {
        let puk = Puk::parse(puk).map_err(|e| self.reject(e.into()))?;
        let new_pin = Pin::parse(new_pin).map_err(|e| self.reject(e.into()))?;

        let response = commands::reset_pin_with_puk(puk.to_bytes(), new_pin.to_bytes())
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;
        let sw = response.sw;
        if !sw.is_success() {
            let err: CardError = if sw.sw1 == WRONG_CREDENTIAL {
                SecurityError::WrongPuk {
                    attempts_remaining: sw.sw2 & 0x0F,
                }
                .into()
            } else if sw == SW_BLOCKED {
                SecurityError::PukBlocked.into()
            } else if let Some(expected) = sw.corrected_length() {
                ProtocolError::LengthMismatch { expected }.into()
            } else {
                ProtocolError::UnknownCardError { sw }.into()
            };
            warn!(error = %err, "PIN reset refused");
            return Err(self.fail(err));
        }

        self.pin_blocked = false;
        self.state = TransactionState::Idle;
        info!("PIN reset with PUK");
        Ok(())
    }

    /// Current anti-replay counter. Needs no PIN.
    pub fn read_counter(&mut self) -> Result<u16, CardError> {
        let response = commands::read_counter()
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;
        if !response.is_success() {
            return Err(self.abort(ProtocolError::CounterUnavailable { sw: response.sw }.into()));
        }
        let counter = decode_u16(&response.data).map_err(|e| self.abort(e.into()))?;

        if self.state == TransactionState::PinVerified {
            self.state = TransactionState::CounterRead { counter };
        }
        debug!(counter, "Counter read");
        Ok(counter)
    }

    /// Balance in cents. Consumes the verified PIN.
    pub fn read_balance(&mut self) -> Result<u16, CardError> {
        self.require_verified_pin()?;

        let response = commands::read_balance()
            .send(&mut self.session)
            .map_err(|e| self.abort(e))?;
        // The card has consumed the PIN whatever the outcome.
        self.state = TransactionState::Idle;

        if response.sw == SW_SECURITY_NOT_SATISFIED {
            return Err(self.reject(SecurityError::PinRequired.into()));
        }
        if !response.is_success() {
            return Err(self.abort(ProtocolError::BalanceReadFailed { sw: response.sw }.into()));
        }
        decode_u16(&response.data).map_err(|e| self.abort(e.into()))
    }

    pub fn credit(&mut self, amount_cents: u16, counter: u16) -> Result<MutationReceipt, CardError> {
        self.mutate(Direction::Credit, amount_cents, counter)
    }

    pub fn debit(&mut self, amount_cents: u16, counter: u16) -> Result<MutationReceipt, CardError> {
        self.mutate(Direction::Debit, amount_cents, counter)
    }

    /// Verify the PIN and return the balance in cents.
    pub fn balance_with_pin(&mut self, pin: &str) -> Result<u16, CardError> {
        self.verify_pin(pin)?;
        self.read_balance()
    }

    /// Full credit sequence for a decimal amount: validate, verify PIN, read
    /// counter, credit.
    pub fn credit_amount(&mut self, pin: &str, amount: Decimal) -> Result<MutationReceipt, CardError> {
        let cents = to_minor_units(amount).map_err(|e| self.reject(e.into()))?;
        self.mutate_with_pin(Direction::Credit, pin, cents)
    }

    pub fn debit_amount(&mut self, pin: &str, amount: Decimal) -> Result<MutationReceipt, CardError> {
        let cents = to_minor_units(amount).map_err(|e| self.reject(e.into()))?;
        self.mutate_with_pin(Direction::Debit, pin, cents)
    }

    pub fn credit_cents(&mut self, pin: &str, amount_cents: u16) -> Result<MutationReceipt, CardError> {
        self.mutate_with_pin(Direction::Credit, pin, amount_cents)
    }

    pub fn debit_cents(&mut self, pin: &str, amount_cents: u16) -> Result<MutationReceipt, CardError> {
        self.mutate_with_pin(Direction::Debit, pin, amount_cents)
    }

    fn mutate_with_pin(
        &mut self,
        direction: Direction,
        pin: &str,
        amount_cents: u16,
    ) -> Result<MutationReceipt, CardError> {
        if amount_cents == 0 {
            return Err(self.reject(carotte_common::AmountError::NotPositive.into()));
        }
        self.verify_pin(pin)?;
        let counter = self.read_counter()?;
        self.mutate(direction, amount_cents, counter)
    }

    fn mutate(
        &mut self,
        direction: Direction,
        amount_cents: u16,
        counter: u16,
    ) -> Result<MutationReceipt, CardError> {
        if amount_cents == 0 {
            return Err(self.reject(carotte_common::AmountError::NotPositive.into()));
        }
        self.require_verified_pin()?;

        self.state = TransactionState::Committing;
        let command = match direction {
            Direction::Credit => commands::credit(counter, amount_cents),
            Direction::Debit => commands::debit(counter, amount_cents),
        };
        let response = command.send(&mut self.session).map_err(|e| self.abort(e))?;
        let sw = response.sw;

        if sw.is_success() {
            self.state = TransactionState::Committed;
            info!(?direction, amount_cents, counter, "Card mutation committed");
            return Ok(MutationReceipt {
                direction,
                amount_cents,
                counter,
            });
        }

        let err: CardError = if direction == Direction::Credit && sw == SW_CAPACITY_EXCEEDED {
            BusinessError::CapacityExceeded.into()
        } else if direction == Direction::Debit && sw.sw1 == LIMIT_REACHED {
            BusinessError::InsufficientBalance.into()
        } else if sw == SW_SECURITY_NOT_SATISFIED {
            SecurityError::PinRequired.into()
        } else if sw == SW_COUNTER_MISMATCH {
            SecurityError::ReplayRejected.into()
        } else if let Some(expected) = sw.corrected_length() {
            ProtocolError::LengthMismatch { expected }.into()
        } else {
            ProtocolError::UnknownCardError { sw }.into()
        };
        info!(?direction, amount_cents, counter, %sw, error = %err, "Card mutation rejected");
        Err(self.fail(err))
    }

    fn require_verified_pin(&mut self) -> Result<(), CardError> {
        match self.state {
            TransactionState::PinVerified | TransactionState::CounterRead { .. } => Ok(()),
            _ => Err(self.reject(SecurityError::PinRequired.into())),
        }
    }

    /// Shared by verify and change PIN.
    fn check_pin_outcome(&mut self, sw: StatusWord) -> Result<(), CardError> {
        if sw.is_success() {
            return Ok(());
        }
        let err: CardError = if sw.sw1 == WRONG_CREDENTIAL {
            SecurityError::WrongPin {
                attempts_remaining: sw.sw2 & 0x0F,
            }
            .into()
        } else if sw == SW_BLOCKED {
            self.pin_blocked = true;
            SecurityError::PinBlocked.into()
        } else if let Some(expected) = sw.corrected_length() {
            ProtocolError::LengthMismatch { expected }.into()
        } else {
            ProtocolError::UnknownCardError { sw }.into()
        };
        warn!(error = %err, "PIN refused");
        Err(self.fail(err))
    }

    fn fail(&mut self, err: CardError) -> CardError {
        match err.category() {
            ErrorCategory::Transport | ErrorCategory::Protocol => self.abort(err),
            _ => self.reject(err),
        }
    }

    fn abort(&mut self, err: CardError) -> CardError {
        self.state = TransactionState::Idle;
        err
    }

    fn reject(&mut self, err: CardError) -> CardError {
        self.state = TransactionState::Rejected;
        err
    }
}

fn decode_u16(data: &[u8]) -> Result<u16, ProtocolError> {
    match data {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(ProtocolError::MalformedResponse {
            expected: 2,
            actual: data.len(),
        }),
    }
}
