//! Software student card
//!
//! Behaves like firmware 2.00 byte for byte, so it can stand in for a reader
//! in tests and in demo mode. Clones share the same card.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use carotte_common::Puk;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apdu::commands::*;
use crate::error::TransportError;
use crate::reader::{CardLink, Connector};

pub const FIRMWARE_VERSION: &str = "2.00";
pub const MAX_PERSONALIZATION: usize = 32;
pub const PIN_TRIES: u8 = 3;
pub const PUK_TRIES: u8 = 5;
pub const DEFAULT_PIN: [u8; 4] = [1, 2, 3, 4];

const ATR: [u8; 4] = [0x3B, 0x02, 0x14, 0x50];

/// Persistent (EEPROM) content of the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardState {
    pub personalization: Vec<u8>,
    pub pin: [u8; 4],
    /// Six ASCII digits.
    pub puk: [u8; 6],
    pub pin_tries: u8,
    pub puk_tries: u8,
    pub counter: u16,
    pub balance: u16,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            personalization: Vec::new(),
            pin: DEFAULT_PIN,
            puk: Puk::derive_from_personalization(&[]).to_bytes(),
            pin_tries: PIN_TRIES,
            puk_tries: PUK_TRIES,
            counter: 0,
            balance: 0,
        }
    }
}

impl CardState {
    /// A card assigned to `payload` as the personalization tool leaves it.
    pub fn personalized(payload: &[u8]) -> Self {
        Self {
            personalization: payload.to_vec(),
            puk: Puk::derive_from_personalization(payload).to_bytes(),
            ..Self::default()
        }
    }

    pub fn with_balance(mut self, balance: u16) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_counter(mut self, counter: u16) -> Self {
        self.counter = counter;
        self
    }

    pub fn puk_string(&self) -> String {
        String::from_utf8_lossy(&self.puk).into_owned()
    }
}

#[derive(Debug, Default)]
struct Chip {
    state: CardState,
    /// RAM flag, lost on power-off.
    pin_ok: bool,
    present: bool,
    echo_instruction: bool,
    scripted: VecDeque<Vec<u8>>,
    history: Vec<Vec<u8>>,
}

/// Shared handle to one simulated card.
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    chip: Arc<Mutex<Chip>>,
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new(CardState::default())
    }
}

impl SimulatedCard {
    /// An inserted card with the given content.
    pub fn new(state: CardState) -> Self {
        Self {
            chip: Arc::new(Mutex::new(Chip {
                state,
                present: true,
                ..Chip::default()
            })),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SimulatorError> {
        let text = fs::read_to_string(path)?;
        let state: CardState = serde_json::from_str(&text)?;
        if state.personalization.len() > MAX_PERSONALIZATION {
            return Err(SimulatorError::PersonalizationTooLong {
                len: state.personalization.len(),
                max: MAX_PERSONALIZATION,
            });
        }
        Ok(Self::new(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), SimulatorError> {
        let text = serde_json::to_string_pretty(&self.state())?;
        fs::write(path, text)?;
        Ok(())
    }

    fn chip(&self) -> MutexGuard<'_, Chip> {
        self.chip.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CardState {
        self.chip().state.clone()
    }

    pub fn remove(&self) {
        let mut chip = self.chip();
        chip.present = false;
        chip.pin_ok = false;
    }

    pub fn insert(&self) {
        let mut chip = self.chip();
        chip.present = true;
        chip.pin_ok = false;
    }

    pub fn is_present(&self) -> bool {
        self.chip().present
    }

    /// Drop the verified-PIN flag as if another command had consumed it.
    pub fn expire_security_status(&self) {
        self.chip().pin_ok = false;
    }

    /// Prefix personalization reads with the INS byte.
    pub fn set_echo_instruction(&self, echo: bool) {
        self.chip().echo_instruction = echo;
    }

    /// Answer the next command with `raw` instead of running it.
    pub fn queue_response(&self, raw: Vec<u8>) {
        self.chip().scripted.push_back(raw);
    }

    /// Every frame received, in order.
    pub fn history(&self) -> Vec<Vec<u8>> {
        self.chip().history.clone()
    }

    pub fn transmit_count(&self) -> usize {
        self.chip().history.len()
    }
}

impl CardLink for SimulatedCard {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut chip = self.chip();
        if !chip.present {
            return Err(TransportError::Disconnected);
        }
        chip.history.push(command.to_vec());
        if let Some(raw) = chip.scripted.pop_front() {
            return Ok(raw);
        }
        let response = chip.execute(command);
        debug!(sw = %hex::encode_upper(&response[response.len() - 2..]), "Simulated card answered");
        Ok(response)
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.chip().present {
            Ok(ATR.to_vec())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

/// A reader with a [`SimulatedCard`] in it.
#[derive(Debug, Clone)]
pub struct SimulatedReader {
    card: SimulatedCard,
    name: String,
}

impl SimulatedReader {
    pub fn new(card: SimulatedCard) -> Self {
        Self {
            card,
            name: "Simulated Reader 0".to_string(),
        }
    }

    pub fn card(&self) -> &SimulatedCard {
        &self.card
    }
}

impl Connector for SimulatedReader {
    type Link = SimulatedCard;

    fn connect_first(&self) -> Result<(SimulatedCard, String), TransportError> {
        if !self.card.is_present() {
            return Err(TransportError::NoCard);
        }
        Ok((self.card.clone(), self.name.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("cannot access card state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("card state file is invalid: {0}")]
    Format(#[from] serde_json::Error),

    #[error("card state holds {len} personalization bytes, the card keeps at most {max}")]
    PersonalizationTooLong { len: usize, max: usize },
}

fn sw(sw1: u8, sw2: u8) -> Vec<u8> {
    vec![sw1, sw2]
}

fn with_data(mut data: Vec<u8>) -> Vec<u8> {
    data.extend_from_slice(&[0x90, 0x00]);
    data
}

impl Chip {
    fn execute(&mut self, command: &[u8]) -> Vec<u8> {
        let [cla, ins, p1, p2, p3] = match command.get(..5) {
            Some(&[cla, ins, p1, p2, p3]) => [cla, ins, p1, p2, p3],
            _ => return sw(0x67, 0x00),
        };
        let body = &command[5..];

        match (cla, ins) {
            (CLA_ADMIN, INS_VERSION) => self.version(p3),
            (CLA_ADMIN, INS_WRITE_PERSONALIZATION) => self.write_personalization(p3, body),
            (CLA_ADMIN, INS_READ_PERSONALIZATION) => self.read_personalization(p3),
            (CLA_PURSE, INS_READ_BALANCE) => self.read_balance(p3),
            (CLA_PURSE, INS_CREDIT) => self.mutate(true, p1, p2, p3, body),
            (CLA_PURSE, INS_DEBIT) => self.mutate(false, p1, p2, p3, body),
            (CLA_PURSE, INS_VERIFY_PIN) => self.verify_pin(p3, body),
            (CLA_PURSE, INS_CHANGE_PIN) => self.change_pin(p3, body),
            (CLA_PURSE, INS_RESET_PIN) => self.reset_pin(p3, body),
            (CLA_PURSE, INS_READ_COUNTER) => self.read_counter(p3),
            (CLA_ADMIN | CLA_PURSE, _) => sw(0x6D, 0x00),
            _ => sw(0x6E, 0x00),
        }
    }

    fn version(&self, p3: u8) -> Vec<u8> {
        if usize::from(p3) != FIRMWARE_VERSION.len() {
            return sw(0x6C, FIRMWARE_VERSION.len() as u8);
        }
        with_data(FIRMWARE_VERSION.as_bytes().to_vec())
    }

    fn write_personalization(&mut self, p3: u8, body: &[u8]) -> Vec<u8> {
        if usize::from(p3) > MAX_PERSONALIZATION {
            return sw(0x6C, MAX_PERSONALIZATION as u8);
        }
        let Some(payload) = body.get(..usize::from(p3)) else {
            return sw(0x67, 0x00);
        };
        self.state = CardState::personalized(payload);
        self.pin_ok = false;
        sw(0x90, 0x00)
    }

    fn read_personalization(&self, p3: u8) -> Vec<u8> {
        // States built in code can exceed what the length byte carries.
        let stored = u8::try_from(self.state.personalization.len()).unwrap_or(u8::MAX);
        if p3 != stored {
            return sw(0x6C, stored);
        }
        let mut data = Vec::with_capacity(usize::from(stored) + 1);
        if self.echo_instruction {
            data.push(INS_READ_PERSONALIZATION);
        }
        data.extend_from_slice(&self.state.personalization);
        with_data(data)
    }

    fn read_balance(&mut self, p3: u8) -> Vec<u8> {
        if !std::mem::take(&mut self.pin_ok) {
            return sw(0x69, 0x82);
        }
        if p3 != 2 {
            return sw(0x6C, 0x02);
        }
        with_data(self.state.balance.to_le_bytes().to_vec())
    }

    fn read_counter(&self, p3: u8) -> Vec<u8> {
        if p3 != 2 {
            return sw(0x6C, 0x02);
        }
        with_data(self.state.counter.to_le_bytes().to_vec())
    }

    fn mutate(&mut self, credit: bool, p1: u8, p2: u8, p3: u8, body: &[u8]) -> Vec<u8> {
        if !std::mem::take(&mut self.pin_ok) {
            return sw(0x69, 0x82);
        }
        if u16::from_le_bytes([p1, p2]) != self.state.counter {
            return sw(0x69, 0x84);
        }
        self.state.counter = self.state.counter.wrapping_add(1);
        if p3 != 2 {
            return sw(0x6C, 0x02);
        }
        let Some(&[lo, hi]) = body.get(..2) else {
            return sw(0x67, 0x00);
        };
        let amount = u16::from_le_bytes([lo, hi]);

        let balance = if credit {
            self.state.balance.checked_add(amount)
        } else {
            self.state.balance.checked_sub(amount)
        };
        match balance {
            Some(balance) => {
                self.state.balance = balance;
                sw(0x90, 0x00)
            }
            None => sw(0x61, 0x00),
        }
    }

    fn verify_pin(&mut self, p3: u8, body: &[u8]) -> Vec<u8> {
        if self.state.pin_tries == 0 {
            return sw(0x69, 0x83);
        }
        if p3 != 4 {
            return sw(0x6C, 0x04);
        }
        match self.check_pin(body) {
            Ok(()) => {
                self.pin_ok = true;
                sw(0x90, 0x00)
            }
            Err(refusal) => refusal,
        }
    }

    fn change_pin(&mut self, p3: u8, body: &[u8]) -> Vec<u8> {
        if self.state.pin_tries == 0 {
            return sw(0x69, 0x83);
        }
        if p3 != 8 {
            return sw(0x6C, 0x08);
        }
        if let Err(refusal) = self.check_pin(body) {
            return refusal;
        }
        let Some(&[a, b, c, d]) = body.get(4..8) else {
            return sw(0x67, 0x00);
        };
        self.state.pin = [a, b, c, d];
        self.pin_ok = false;
        sw(0x90, 0x00)
    }

    fn reset_pin(&mut self, p3: u8, body: &[u8]) -> Vec<u8> {
        if self.state.puk_tries == 0 {
            return sw(0x69, 0x83);
        }
        if p3 != 10 {
            return sw(0x6C, 0x0A);
        }
        let (Some(puk), Some(&[a, b, c, d])) = (body.get(..6), body.get(6..10)) else {
            return sw(0x67, 0x00);
        };
        if puk != self.state.puk {
            self.state.puk_tries -= 1;
            return if self.state.puk_tries == 0 {
                sw(0x69, 0x83)
            } else {
                sw(0x63, self.state.puk_tries)
            };
        }
        self.state.pin = [a, b, c, d];
        self.state.pin_tries = PIN_TRIES;
        self.state.puk_tries = PUK_TRIES;
        self.pin_ok = false;
        sw(0x90, 0x00)
    }

    /// Compares the first four body bytes with the stored PIN and updates
    /// the try counter.
    fn check_pin(&mut self, body: &[u8]) -> Result<(), Vec<u8>> {
        if body.get(..4) == Some(&self.state.pin[..]) {
            self.state.pin_tries = PIN_TRIES;
            return Ok(());
        }
        self.state.pin_tries -= 1;
        self.pin_ok = false;
        if self.state.pin_tries == 0 {
            Err(sw(0x69, 0x83))
        } else {
            Err(sw(0x63, self.state.pin_tries))
        }
    }
}
