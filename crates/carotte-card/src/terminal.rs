//! Session acquisition for one reader

use tracing::info;

use crate::error::TransportError;
use crate::protocol::{PersonalizationLayout, StudentCard};
use crate::reader::{CardSession, Connector};

/// Owns at most one live card session and hands it out on demand.
pub struct Terminal<C: Connector> {
    connector: C,
    layout: PersonalizationLayout,
    card: Option<StudentCard<C::Link>>,
}

impl<C: Connector> Terminal<C> {
    pub fn new(connector: C, layout: PersonalizationLayout) -> Self {
        Self {
            connector,
            layout,
            card: None,
        }
    }

    /// Reuse the current session if the card still answers its ATR,
    /// otherwise connect to the first reader.
    pub fn acquire(&mut self) -> Result<&mut StudentCard<C::Link>, TransportError> {
        let alive = match self.card.as_mut() {
            Some(card) => card.session_mut().probe(),
            None => false,
        };

        if !alive {
            self.card = None;
            let (link, reader_name) = self.connector.connect_first()?;
            let session = CardSession::open(link, reader_name)?;
            info!(
                reader = %session.reader_name(),
                atr = %hex::encode_upper(session.atr()),
                "Card session established"
            );
            self.card = Some(StudentCard::new(session, self.layout));
        }

        self.card.as_mut().ok_or(TransportError::NoCard)
    }

    pub fn has_session(&self) -> bool {
        self.card.is_some()
    }

    /// Forget the current session; the next `acquire` reconnects.
    pub fn release(&mut self) {
        if let Some(mut card) = self.card.take() {
            card.session_mut().close();
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedCard, SimulatedReader};

    #[test]
    fn test_acquire_reuses_live_session() {
        let card = SimulatedCard::default();
        let mut terminal = Terminal::new(SimulatedReader::new(card), PersonalizationLayout::Raw);

        terminal.acquire().unwrap().verify_pin("1234").unwrap();
        // Same engine: the verified state survives.
        let state = terminal.acquire().unwrap().state();
        assert_eq!(state, crate::protocol::TransactionState::PinVerified);
    }

    #[test]
    fn test_acquire_reconnects_after_removal() {
        let card = SimulatedCard::default();
        let mut terminal =
            Terminal::new(SimulatedReader::new(card.clone()), PersonalizationLayout::Raw);
        terminal.acquire().unwrap().verify_pin("1234").unwrap();

        card.remove();
        assert_eq!(terminal.acquire().err(), Some(TransportError::NoCard));
        assert!(!terminal.has_session());

        card.insert();
        let fresh = terminal.acquire().unwrap();
        assert_eq!(fresh.state(), crate::protocol::TransactionState::Idle);
    }
}
