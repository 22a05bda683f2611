//! Status words returned by the card

use std::fmt;

use serde::{Deserialize, Serialize};

/// The (SW1, SW2) pair closing every card response.
///
/// A status word is not an error by itself: each command interprets it
/// through its own outcome table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Check if the status word indicates success (9000)
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// `6Cxx`: wrong expected length, correct length in SW2.
    pub fn corrected_length(&self) -> Option<u8> {
        (self.sw1 == 0x6C).then_some(self.sw2)
    }

    /// Get the full status word as a 16-bit value
    pub fn as_u16(&self) -> u16 {
        (u16::from(self.sw1) << 8) | u16::from(self.sw2)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Human-readable name for a status word, as the student card firmware uses it.
pub fn describe_status(sw: StatusWord) -> &'static str {
    match (sw.sw1, sw.sw2) {
        (0x90, 0x00) => "Success",
        (0x61, 0x00) => "Balance limit reached (overflow or insufficient funds)",
        (0x61, _) => "Balance limit reached",
        (0x63, _) => "Verification failed, tries remaining in SW2",
        (0x69, 0x82) => "Security status not satisfied",
        (0x69, 0x83) => "Authentication method blocked",
        (0x69, 0x84) => "Anti-replay counter mismatch",
        (0x6C, _) => "Wrong expected length, correct length in SW2",
        (0x6D, _) => "Instruction not supported",
        (0x6E, _) => "Class not supported",
        _ => "Unknown status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_display() {
        assert_eq!(StatusWord::new(0x69, 0x84).to_string(), "6984");
        assert_eq!(StatusWord::SUCCESS.as_u16(), 0x9000);
    }

    #[test]
    fn test_corrected_length() {
        assert_eq!(StatusWord::new(0x6C, 0x12).corrected_length(), Some(0x12));
        assert_eq!(StatusWord::new(0x6C, 0x00).corrected_length(), Some(0));
        assert_eq!(StatusWord::SUCCESS.corrected_length(), None);
    }

    #[test]
    fn test_describe_status() {
        assert_eq!(describe_status(StatusWord::new(0x69, 0x83)), "Authentication method blocked");
        assert_eq!(describe_status(StatusWord::new(0x12, 0x34)), "Unknown status");
    }
}
