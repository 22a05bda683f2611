pub mod card;
pub mod kiosk;
pub mod ledger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use carotte_card::{
    CardLink, CardReader, CardSession, Connector, SimulatedCard, SimulatedReader, StudentCard,
};
use carotte_kiosk::{Coordinator, JsonlOperatorQueue, KioskConfig};
use carotte_ledger::SqliteLedger;
use tracing::{debug, info};

use crate::formatters::FormatMode;

/// Picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "carotte.toml";

/// A card engine over either a PC/SC reader or the simulated card.
pub type Card = StudentCard<Box<dyn CardLink>>;

/// Everything a command needs: configuration, output mode and where the card is.
pub struct Context {
    pub config: KioskConfig,
    pub format: FormatMode,
    simulation: Option<Simulation>,
}

struct Simulation {
    path: PathBuf,
    card: SimulatedCard,
}

impl Context {
    pub fn load(
        config_path: Option<&Path>,
        simulate: Option<PathBuf>,
        format: FormatMode,
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => KioskConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                KioskConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                    .with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))?
            }
            None => KioskConfig::default(),
        };

        let simulation = match simulate {
            Some(path) => {
                let card = if path.exists() {
                    SimulatedCard::load(&path)
                        .with_context(|| format!("loading simulated card {}", path.display()))?
                } else {
                    info!(path = %path.display(), "Starting with a blank simulated card");
                    SimulatedCard::default()
                };
                Some(Simulation { path, card })
            }
            None => None,
        };

        Ok(Self {
            config,
            format,
            simulation,
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.simulation.is_some()
    }

    /// Connect to the card and wrap it in a transaction engine.
    pub fn open_card(&self) -> anyhow::Result<Card> {
        let (link, reader_name): (Box<dyn CardLink>, String) = match &self.simulation {
            Some(sim) => {
                let (link, name) = SimulatedReader::new(sim.card.clone()).connect_first()?;
                (Box::new(link), name)
            }
            None => {
                let reader = CardReader::new()
                    .context("failed to establish PC/SC context")?
                    .with_reader_filter(self.config.card.reader.clone());
                let (link, name) = reader
                    .connect_first()
                    .context("failed to connect to card, is one present on the reader?")?;
                (Box::new(link), name)
            }
        };
        let session = CardSession::open(link, reader_name)?;
        debug!(reader = %session.reader_name(), "Card session opened");
        Ok(StudentCard::new(session, self.config.card.personalization_layout))
    }

    pub fn ledger(&self) -> anyhow::Result<Arc<SqliteLedger>> {
        let path = &self.config.ledger.path;
        let ledger = SqliteLedger::open(path)
            .with_context(|| format!("opening ledger {}", path.display()))?;
        Ok(Arc::new(ledger))
    }

    pub fn operators(&self) -> Arc<JsonlOperatorQueue> {
        Arc::new(JsonlOperatorQueue::new(self.config.escalation.path.clone()))
    }

    pub fn coordinator(&self) -> anyhow::Result<Coordinator> {
        Ok(Coordinator::new(
            self.ledger()?,
            self.operators(),
            self.config.terminal.name.clone(),
        ))
    }

    /// Write the simulated card back to its state file.
    pub fn save_simulation(&self) -> anyhow::Result<()> {
        if let Some(sim) = &self.simulation {
            sim.card
                .save(&sim.path)
                .with_context(|| format!("saving simulated card {}", sim.path.display()))?;
        }
        Ok(())
    }
}
