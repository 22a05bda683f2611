//! PC/SC card reader management

use std::ffi::CStr;

use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::{debug, warn};

use crate::apdu::ApduResponse;
use crate::error::TransportError;

/// One physical (or simulated) channel to an inserted card.
pub trait CardLink {
    /// Exchange raw APDU bytes. The response still carries SW1 SW2.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Current answer-to-reset; fails once the card is gone.
    fn atr(&mut self) -> Result<Vec<u8>, TransportError>;
}

impl<L: CardLink + ?Sized> CardLink for Box<L> {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).atr()
    }
}

/// Something that can open a [`CardLink`] on the first usable reader.
pub trait Connector {
    type Link: CardLink;

    fn connect_first(&self) -> Result<(Self::Link, String), TransportError>;
}

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
    reader_filter: Option<String>,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, TransportError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self {
            context,
            reader_filter: None,
        })
    }

    /// Only use readers whose name contains `filter`.
    pub fn with_reader_filter(mut self, filter: Option<String>) -> Self {
        self.reader_filter = filter;
        self
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_str().unwrap_or("Unknown").to_string())
            .collect())
    }

    fn matches_filter(&self, reader: &CStr) -> bool {
        match &self.reader_filter {
            Some(filter) => reader.to_string_lossy().contains(filter.as_str()),
            None => true,
        }
    }
}

impl Connector for CardReader {
    type Link = PcscLink;

    /// Connect to the first available reader
    fn connect_first(&self) -> Result<(PcscLink, String), TransportError> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        let Some(reader) = readers.find(|r| self.matches_filter(r)) else {
            return Err(TransportError::NoReader);
        };
        let reader_name = reader.to_str().unwrap_or("Unknown").to_string();
        let card = self
            .context
            .connect(reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|err| match TransportError::from(err) {
                // Nothing to lose at connect time: the slot is simply empty.
                TransportError::Disconnected => TransportError::NoCard,
                other => other,
            })?;
        debug!(reader = %reader_name, "Connected to card");
        Ok((PcscLink { card }, reader_name))
    }
}

/// A PC/SC card handle.
pub struct PcscLink {
    card: Card,
}

impl CardLink for PcscLink {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = self.card.transmit(command, &mut rapdu_buf)?;
        Ok(rapdu.to_vec())
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        let status = self.card.status2_owned()?;
        Ok(status.atr().to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// The card went away mid-session; reconnect before using it again.
    Invalid,
}

/// An open link to one card, with the reader it sits in.
pub struct CardSession<L> {
    link: L,
    reader_name: String,
    state: SessionState,
    atr: Vec<u8>,
}

impl<L: CardLink> CardSession<L> {
    pub fn open(mut link: L, reader_name: String) -> Result<Self, TransportError> {
        let atr = link.atr()?;
        Ok(Self {
            link,
            reader_name,
            state: SessionState::Connected,
            atr,
        })
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Check the card still answers. Marks the session invalid if not.
    pub fn probe(&mut self) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        match self.link.atr() {
            Ok(atr) => {
                self.atr = atr;
                true
            }
            Err(err) => {
                debug!(reader = %self.reader_name, error = %err, "Card no longer answers");
                self.state = SessionState::Invalid;
                false
            }
        }
    }

    /// Send raw APDU bytes and split the response.
    pub fn transmit(&mut self, command: &[u8]) -> Result<ApduResponse, TransportError> {
        if self.state != SessionState::Connected {
            return Err(TransportError::Disconnected);
        }

        let raw = match self.link.transmit(command) {
            Ok(raw) => raw,
            Err(err) => {
                if matches!(err, TransportError::Disconnected | TransportError::NoCard) {
                    warn!(reader = %self.reader_name, "Card removed during exchange");
                    self.state = SessionState::Invalid;
                }
                return Err(err);
            }
        };

        ApduResponse::from_raw(&raw).ok_or(TransportError::ShortResponse { len: raw.len() })
    }

    pub fn close(&mut self) {
        self.state = SessionState::Disconnected;
    }
}
