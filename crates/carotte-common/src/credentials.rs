//! Cardholder credentials
//!
//! A PIN travels as four raw digit values (1, 2, 3, 4), not ASCII codes.
//! The PUK is generated by the card firmware as six ASCII digits and is
//! compared byte-for-byte, so it travels as ASCII.

use std::fmt;

use thiserror::Error;

/// Number of digits in a PIN.
pub const PIN_LEN: usize = 4;

/// Number of digits in a PUK.
pub const PUK_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("PIN must be exactly {PIN_LEN} decimal digits")]
    InvalidPinFormat,

    #[error("PUK must be exactly {PUK_LEN} decimal digits")]
    InvalidPukFormat,
}

/// A validated 4-digit PIN.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pin([u8; PIN_LEN]);

impl Pin {
    /// Parse `"1234"` into digit values.
    pub fn parse(text: &str) -> Result<Self, CredentialError> {
        let digits = parse_digits::<PIN_LEN>(text).ok_or(CredentialError::InvalidPinFormat)?;
        Ok(Self(digits))
    }

    /// Bytes as sent to the card (digit values 0..=9).
    pub fn to_bytes(&self) -> [u8; PIN_LEN] {
        self.0
    }
}

// Never print the digits.
impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// A validated 6-digit PUK.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Puk([u8; PUK_LEN]);

impl Puk {
    pub fn parse(text: &str) -> Result<Self, CredentialError> {
        let digits = parse_digits::<PUK_LEN>(text).ok_or(CredentialError::InvalidPukFormat)?;
        Ok(Self(digits))
    }

    /// ASCII digits as stored by the card.
    pub fn to_bytes(&self) -> [u8; PUK_LEN] {
        self.0.map(|d| b'0' + d)
    }

    /// The PUK the card derives when it is personalized with `payload`.
    ///
    /// Lets the personalization tool hand the PUK to the student without a
    /// command to read it back.
    pub fn derive_from_personalization(payload: &[u8]) -> Self {
        let mut h1: u16 = 0x1357;
        let mut h2: u16 = 0x2468;
        for (i, &b) in payload.iter().enumerate() {
            let i = i as u16;
            let b = u16::from(b);
            h1 = h1.wrapping_add(b).wrapping_add(i.wrapping_mul(17)) ^ (b << (i & 7));
            h2 = (h2 ^ b.wrapping_add(i.wrapping_mul(31))).wrapping_add(h1 >> 3);
        }
        Self([
            nibble_to_digit(h1),
            nibble_to_digit(h1 >> 4),
            nibble_to_digit(h1 >> 8),
            nibble_to_digit(h2),
            nibble_to_digit(h2 >> 4),
            nibble_to_digit(h2 >> 8),
        ])
    }
}

// 10..=15 fold onto 4..=9
fn nibble_to_digit(x: u16) -> u8 {
    let x = (x & 0x0F) as u8;
    if x > 9 {
        x - 6
    } else {
        x
    }
}

impl fmt::Debug for Puk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Puk(******)")
    }
}

fn parse_digits<const N: usize>(text: &str) -> Option<[u8; N]> {
    let bytes = text.as_bytes();
    if bytes.len() != N || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut out = [0u8; N];
    for (slot, byte) in out.iter_mut().zip(bytes) {
        *slot = byte - b'0';
    }
    Some(out)
}
