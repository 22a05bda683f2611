//! Error taxonomy for card operations
//!
//! Every failure a card operation can produce maps to one [`ErrorCategory`].
//! Callers branch on [`CardError::category`] rather than on raw status words.

pub use carotte_common::ErrorCategory;
use carotte_common::{AmountError, CredentialError, PersonalizationError, StatusWord};
use thiserror::Error;

/// Reader and link failures. The session cannot be trusted afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no card reader available")]
    NoReader,

    #[error("no card in the reader")]
    NoCard,

    #[error("card was removed or reset during the exchange")]
    Disconnected,

    #[error("reader returned {len} byte(s), a status word needs 2")]
    ShortResponse { len: usize },

    #[error("reader error: {0}")]
    Reader(String),
}

impl From<pcsc::Error> for TransportError {
    fn from(err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::NoReadersAvailable
            | pcsc::Error::UnknownReader
            | pcsc::Error::ReaderUnavailable => TransportError::NoReader,
            pcsc::Error::NoSmartcard => TransportError::NoCard,
            pcsc::Error::RemovedCard
            | pcsc::Error::ResetCard
            | pcsc::Error::UnpoweredCard
            | pcsc::Error::UnresponsiveCard => TransportError::Disconnected,
            other => TransportError::Reader(other.to_string()),
        }
    }
}

/// The card answered something the command does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Still `6Cxx` after retrying with the length the card asked for.
    #[error("card keeps asking for a different length ({expected} bytes)")]
    LengthMismatch { expected: u8 },

    #[error("anti-replay counter could not be read (SW {sw})")]
    CounterUnavailable { sw: StatusWord },

    #[error("balance could not be read (SW {sw})")]
    BalanceReadFailed { sw: StatusWord },

    #[error("card returned unexpected status {sw}")]
    UnknownCardError { sw: StatusWord },

    #[error("expected {expected} data byte(s), card returned {actual}")]
    MalformedResponse { expected: usize, actual: usize },

    #[error("command payload of {len} bytes does not fit in one APDU")]
    PayloadTooLong { len: usize },

    #[error("personalization data on the card is unreadable: {0}")]
    MalformedPersonalization(PersonalizationError),
}

/// Cardholder verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("PIN must be exactly 4 decimal digits")]
    InvalidPinFormat,

    #[error("PUK must be exactly 6 decimal digits")]
    InvalidPukFormat,

    #[error("wrong PIN, {attempts_remaining} attempt(s) remaining")]
    WrongPin { attempts_remaining: u8 },

    #[error("PIN is blocked")]
    PinBlocked,

    #[error("PIN verification required")]
    PinRequired,

    #[error("anti-replay counter mismatch, transaction rejected")]
    ReplayRejected,

    #[error("wrong PUK, {attempts_remaining} attempt(s) remaining")]
    WrongPuk { attempts_remaining: u8 },

    #[error("PUK is blocked, the card must be re-personalized")]
    PukBlocked,
}

impl From<CredentialError> for SecurityError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidPinFormat => SecurityError::InvalidPinFormat,
            CredentialError::InvalidPukFormat => SecurityError::InvalidPukFormat,
        }
    }
}

/// Requests the card refused on business grounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("balance would exceed the card capacity")]
    CapacityExceeded,

    #[error(transparent)]
    InvalidAmount(#[from] AmountError),

    #[error("card is not assigned to a student")]
    CardUnassigned,

    #[error("invalid personalization: {0}")]
    InvalidPersonalization(PersonalizationError),

    #[error("personalization data exceeds the card limit of {max} bytes")]
    PersonalizationTooLong { max: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Business(#[from] BusinessError),
}

impl CardError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CardError::Transport(_) => ErrorCategory::Transport,
            CardError::Protocol(_) => ErrorCategory::Protocol,
            CardError::Security(_) => ErrorCategory::Security,
            CardError::Business(_) => ErrorCategory::Business,
        }
    }

    /// Transport failures clear up by re-acquiring a session. Nothing else does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CardError::Transport(_))
    }
}

impl From<CredentialError> for CardError {
    fn from(err: CredentialError) -> Self {
        CardError::Security(err.into())
    }
}

impl From<AmountError> for CardError {
    fn from(err: AmountError) -> Self {
        CardError::Business(err.into())
    }
}
