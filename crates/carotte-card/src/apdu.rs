//! APDU (Application Protocol Data Unit) command handling
//!
//! The card speaks T=0 with a single length byte (P3): it is Lc when the
//! command carries data and Le when it expects some back.

use carotte_common::{describe_status, StatusWord};
use tracing::debug;

use crate::error::{CardError, ProtocolError};
use crate::reader::{CardLink, CardSession};

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    pub sw: StatusWord,
}

impl ApduResponse {
    /// Split a raw reader response into data and trailing status word.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        let split = raw.len().checked_sub(2)?;
        Some(Self {
            data: raw[..split].to_vec(),
            sw: StatusWord::new(raw[split], raw[split + 1]),
        })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw.is_success()
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        self.sw.as_u16()
    }

    /// Get status word as hex string with its meaning (e.g., "6984 (Anti-replay counter mismatch)")
    pub fn status_string(&self) -> String {
        format!("{} ({})", self.sw, describe_status(self.sw))
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn ins(&self) -> u8 {
        self.ins
    }

    pub fn expected_length(&self) -> Option<u8> {
        self.le
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len())
                .map_err(|_| ProtocolError::PayloadTooLong { len: self.data.len() })?;
            apdu.push(lc);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        Ok(apdu)
    }

    /// Send this command to the card
    pub fn send<L: CardLink>(&self, session: &mut CardSession<L>) -> Result<ApduResponse, CardError> {
        let apdu_bytes = self.build()?;
        let response = session.transmit(&apdu_bytes)?;
        // Header only: data fields may carry a PIN or PUK.
        debug!(
            header = %hex::encode_upper(&apdu_bytes[..4]),
            sw = %response.sw,
            len = response.data.len(),
            "APDU exchanged"
        );
        Ok(response)
    }

    /// Send, and on `6Cxx` resend once with the length the card asked for.
    ///
    /// A second `6Cxx` is reported as [`ProtocolError::LengthMismatch`].
    pub fn send_adjusting_length<L: CardLink>(
        &self,
        session: &mut CardSession<L>,
    ) -> Result<ApduResponse, CardError> {
        let response = self.send(session)?;
        let Some(corrected) = response.sw.corrected_length() else {
            return Ok(response);
        };

        debug!(
            ins = self.ins,
            guessed = ?self.le,
            corrected,
            "Card asked for another length, retrying"
        );
        let retry = self.clone().le(corrected);
        let response = retry.send(session)?;
        if let Some(expected) = response.sw.corrected_length() {
            return Err(ProtocolError::LengthMismatch { expected }.into());
        }
        Ok(response)
    }
}

/// Student card APDU commands
pub mod commands {
    use super::ApduCommand;

    /// Administrative class: version and personalization.
    pub const CLA_ADMIN: u8 = 0x81;
    /// Purse class: PIN, counter and balance.
    pub const CLA_PURSE: u8 = 0x82;

    pub const INS_VERSION: u8 = 0x00;
    pub const INS_WRITE_PERSONALIZATION: u8 = 0x01;
    pub const INS_READ_PERSONALIZATION: u8 = 0x02;

    pub const INS_READ_BALANCE: u8 = 0x01;
    pub const INS_CREDIT: u8 = 0x02;
    pub const INS_DEBIT: u8 = 0x03;
    pub const INS_VERIFY_PIN: u8 = 0x04;
    pub const INS_CHANGE_PIN: u8 = 0x05;
    pub const INS_RESET_PIN: u8 = 0x06;
    pub const INS_READ_COUNTER: u8 = 0x07;

    /// Firmware version, 4 ASCII bytes.
    pub fn version() -> ApduCommand {
        ApduCommand::new(CLA_ADMIN, INS_VERSION, 0x00, 0x00).le(4)
    }

    pub fn write_personalization(payload: Vec<u8>) -> ApduCommand {
        ApduCommand::new(CLA_ADMIN, INS_WRITE_PERSONALIZATION, 0x00, 0x00).data(payload)
    }

    /// `guess` is only a first try; the card corrects it with `6Cxx`.
    pub fn read_personalization(guess: u8) -> ApduCommand {
        ApduCommand::new(CLA_ADMIN, INS_READ_PERSONALIZATION, 0x00, 0x00).le(guess)
    }

    pub fn read_balance() -> ApduCommand {
        ApduCommand::new(CLA_PURSE, INS_READ_BALANCE, 0x00, 0x00).le(2)
    }

    /// Counter in P1/P2 (low byte first), amount in cents little-endian.
    pub fn credit(counter: u16, amount_cents: u16) -> ApduCommand {
        value_command(INS_CREDIT, counter, amount_cents)
    }

    pub fn debit(counter: u16, amount_cents: u16) -> ApduCommand {
        value_command(INS_DEBIT, counter, amount_cents)
    }

    fn value_command(ins: u8, counter: u16, amount_cents: u16) -> ApduCommand {
        let [p1, p2] = counter.to_le_bytes();
        ApduCommand::new(CLA_PURSE, ins, p1, p2).data(amount_cents.to_le_bytes().to_vec())
    }

    pub fn verify_pin(pin: [u8; 4]) -> ApduCommand {
        ApduCommand::new(CLA_PURSE, INS_VERIFY_PIN, 0x00, 0x00).data(pin.to_vec())
    }

    pub fn change_pin(old: [u8; 4], new: [u8; 4]) -> ApduCommand {
        let mut data = old.to_vec();
        data.extend_from_slice(&new);
        ApduCommand::new(CLA_PURSE, INS_CHANGE_PIN, 0x00, 0x00).data(data)
    }

    /// PUK as 6 ASCII digits followed by the new PIN.
    pub fn reset_pin_with_puk(puk: [u8; 6], new_pin: [u8; 4]) -> ApduCommand {
        let mut data = puk.to_vec();
        data.extend_from_slice(&new_pin);
        ApduCommand::new(CLA_PURSE, INS_RESET_PIN, 0x00, 0x00).data(data)
    }

    pub fn read_counter() -> ApduCommand {
        ApduCommand::new(CLA_PURSE, INS_READ_COUNTER, 0x00, 0x00).le(2)
    }
}
