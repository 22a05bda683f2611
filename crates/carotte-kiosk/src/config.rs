//! Kiosk configuration loaded from TOML
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below.

use std::path::{Path, PathBuf};

use carotte_card::PersonalizationLayout;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub card: CardConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub vending: VendingConfig,
}

impl KioskConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.terminal.name.trim().is_empty() {
            return Err(ConfigError::Validation("terminal.name must not be empty".into()));
        }
        if self.card.poll_interval_ms == 0 {
            return Err(ConfigError::Validation("card.poll_interval_ms must be positive".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for product in &self.vending.products {
            if product.price_cents == 0 {
                return Err(ConfigError::Validation(format!(
                    "product {:?} has a zero price",
                    product.id
                )));
            }
            if !seen.insert(product.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "product id {:?} is listed twice",
                    product.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shown in ledger comments, e.g. "Recharge CB Berlicum".
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            name: default_terminal_name(),
        }
    }
}

fn default_terminal_name() -> String {
    "Berlicum".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardConfig {
    #[serde(default)]
    pub personalization_layout: PersonalizationLayout,

    /// Use only readers whose name contains this.
    #[serde(default)]
    pub reader: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            personalization_layout: PersonalizationLayout::default(),
            reader: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

const fn default_poll_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("carotte-ledger.db")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// JSON-lines file of incidents awaiting an operator.
    #[serde(default = "default_escalation_path")]
    pub path: PathBuf,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            path: default_escalation_path(),
        }
    }
}

fn default_escalation_path() -> PathBuf {
    PathBuf::from("carotte-incidents.jsonl")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price_cents: u16,
}

impl Product {
    pub fn new(id: &str, name: &str, price_cents: u16) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price_cents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendingConfig {
    #[serde(default = "default_products")]
    pub products: Vec<Product>,
}

impl Default for VendingConfig {
    fn default() -> Self {
        Self {
            products: default_products(),
        }
    }
}

impl VendingConfig {
    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }
}

fn default_products() -> Vec<Product> {
    vec![
        Product::new("cafe", "Café", 20),
        Product::new("the", "Thé", 20),
        Product::new("chocolat", "Chocolat chaud", 20),
        Product::new("cappuccino", "Cappuccino", 20),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = KioskConfig::from_toml("").unwrap();
        assert_eq!(config, KioskConfig::default());
        assert_eq!(config.terminal.name, "Berlicum");
        assert_eq!(config.vending.products.len(), 4);
        assert_eq!(config.card.personalization_layout, PersonalizationLayout::Raw);
    }

    #[test]
    fn test_parse_full_config() {
        let config = KioskConfig::from_toml(
            r#"
            [terminal]
            name = "LunarWhite"

            [card]
            personalization_layout = "echoed-instruction"
            reader = "ACS"
            poll_interval_ms = 500

            [ledger]
            path = "/var/lib/carotte/ledger.db"

            [[vending.products]]
            id = "soupe"
            name = "Soupe"
            price_cents = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.terminal.name, "LunarWhite");
        assert_eq!(config.card.personalization_layout, PersonalizationLayout::EchoedInstruction);
        assert_eq!(config.card.reader.as_deref(), Some("ACS"));
        assert_eq!(config.ledger.path, PathBuf::from("/var/lib/carotte/ledger.db"));
        assert_eq!(config.escalation, EscalationConfig::default());
        assert_eq!(config.vending.product("soupe").unwrap().price_cents, 60);
        assert!(config.vending.product("cafe").is_none());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            KioskConfig::from_toml("[terminal]\nname = \"  \""),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            KioskConfig::from_toml(
                "[[vending.products]]\nid = \"a\"\nname = \"A\"\nprice_cents = 0"
            ),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_layout_rejected() {
        assert!(matches!(
            KioskConfig::from_toml("[card]\npersonalization_layout = \"guess\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.toml");
        let config = KioskConfig::default();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(KioskConfig::from_file(&path).unwrap(), config);
    }
}
