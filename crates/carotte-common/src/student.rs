//! Student identity and the personalization record stored on the card

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of a student number in the ledger (CHAR(8)).
pub const STUDENT_ID_LEN: usize = 8;

/// Field separator inside the personalization payload.
pub const FIELD_SEPARATOR: char = ';';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersonalizationError {
    #[error("student number must be 1 to {STUDENT_ID_LEN} decimal digits, got {0:?}")]
    InvalidStudentId(String),

    #[error("personalization record has {found} field(s), expected 3")]
    MissingField { found: usize },

    #[error("{field} must not be empty or contain '{FIELD_SEPARATOR}'")]
    InvalidName { field: &'static str },

    #[error("character {0:?} cannot be stored on the card")]
    UnencodableCharacter(char),
}

/// An 8-digit, zero-padded student number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    /// Accepts 1 to 8 digits and left-pads with zeros.
    pub fn parse(raw: &str) -> Result<Self, PersonalizationError> {
        let digits = raw.trim();
        if digits.is_empty()
            || digits.len() > STUDENT_ID_LEN
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(PersonalizationError::InvalidStudentId(raw.to_string()));
        }
        Ok(Self(format!("{digits:0>width$}", width = STUDENT_ID_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StudentId {
    type Err = PersonalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StudentId {
    type Error = PersonalizationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StudentId> for String {
    fn from(id: StudentId) -> Self {
        id.0
    }
}

/// `"<student id>;<last name>;<first name>"` as written on the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalizationRecord {
    pub student_id: StudentId,
    pub last_name: String,
    pub first_name: String,
}

impl PersonalizationRecord {
    pub fn new(
        student_id: StudentId,
        last_name: impl Into<String>,
        first_name: impl Into<String>,
    ) -> Result<Self, PersonalizationError> {
        let last_name = last_name.into().trim().to_string();
        let first_name = first_name.into().trim().to_string();
        validate_name("last name", &last_name)?;
        validate_name("first name", &first_name)?;
        Ok(Self {
            student_id,
            last_name,
            first_name,
        })
    }

    /// Payload bytes, one byte per character (Latin-1), no terminator.
    pub fn encode(&self) -> Result<Vec<u8>, PersonalizationError> {
        let text = format!(
            "{}{sep}{}{sep}{}",
            self.student_id,
            self.last_name,
            self.first_name,
            sep = FIELD_SEPARATOR
        );
        text.chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| PersonalizationError::UnencodableCharacter(c)))
            .collect()
    }

    /// Decode a payload read from the card.
    ///
    /// Returns `Ok(None)` for an unassigned card (no bytes). Trailing NUL
    /// padding is ignored.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, PersonalizationError> {
        let end = payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |last| last + 1);
        let payload = &payload[..end];
        if payload.is_empty() {
            return Ok(None);
        }

        let text: String = payload.iter().map(|b| char::from(*b)).collect();
        let fields: Vec<&str> = text.splitn(3, FIELD_SEPARATOR).collect();
        if fields.len() < 3 {
            return Err(PersonalizationError::MissingField {
                found: fields.len(),
            });
        }

        Ok(Some(Self {
            student_id: StudentId::parse(fields[0])?,
            last_name: fields[1].trim().to_string(),
            first_name: fields[2].trim().to_string(),
        }))
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), PersonalizationError> {
    if value.is_empty() || value.contains(FIELD_SEPARATOR) {
        return Err(PersonalizationError::InvalidName { field });
    }
    Ok(())
}
