//! Hardware-dependent integration tests
//!
//! These tests require a physical student card in a card reader.
//! They are ignored by default and must be explicitly run with:
//!
//!     cargo test --package carotte-card --test hardware_integration -- --ignored
//!
//! Tests that present a PIN read it from `CAROTTE_TEST_PIN` (default `1234`).
//! A wrong value costs a PIN try on the card.

use carotte_card::apdu::commands;
use carotte_card::reader::{CardReader, CardSession, Connector};
use carotte_card::{PersonalizationLayout, StudentCard};

fn test_pin() -> String {
    std::env::var("CAROTTE_TEST_PIN").unwrap_or_else(|_| "1234".to_string())
}

fn open_card() -> StudentCard<carotte_card::reader::PcscLink> {
    let reader = CardReader::new().expect("Failed to establish PC/SC context");
    let (link, reader_name) = reader.connect_first().expect("Failed to connect to card");
    println!("Connected to reader: {}", reader_name);
    let session = CardSession::open(link, reader_name).expect("Failed to read ATR");
    StudentCard::new(session, PersonalizationLayout::Raw)
}

/// Test that we can connect to a card reader
///
/// **Requires**: Card reader connected (card not required)
#[test]
#[ignore = "requires hardware: card reader"]
fn test_connect_to_reader() {
    let reader = CardReader::new().expect("Failed to establish PC/SC context");
    let readers = reader.list_readers().expect("Failed to list readers");
    assert!(!readers.is_empty(), "No reader found. Is a reader connected?");
}

/// **Requires**: Card reader with card inserted
#[test]
#[ignore = "requires hardware: card inserted in reader"]
fn test_card_present() {
    let card = open_card();
    println!("ATR: {}", hex::encode_upper(card.session().atr()));
    assert!(!card.session().atr().is_empty());
}

/// The version command goes through the length retry when guessed wrong.
///
/// **Requires**: student card inserted
#[test]
#[ignore = "requires hardware: student card"]
fn test_read_version() {
    let mut card = open_card();
    let wrong_guess = commands::version().le(0x10);
    let response = wrong_guess
        .send_adjusting_length(card.session_mut())
        .expect("Version exchange failed");
    assert!(response.is_success(), "Version failed: {}", response.status_string());
    assert_eq!(response.data.len(), 4);

    let version = card.read_version().expect("Failed to read version");
    println!("Firmware version: {}", version);
}

/// Settles the personalization layout against the reader in use: with the
/// raw layout the first byte must be a student number digit.
///
/// **Requires**: personalized student card
#[test]
#[ignore = "requires hardware: personalized student card"]
fn test_personalization_layout() {
    let mut card = open_card();
    let response = commands::read_personalization(5)
        .send_adjusting_length(card.session_mut())
        .expect("Personalization read failed");
    assert!(response.is_success(), "Read failed: {}", response.status_string());
    println!("Raw personalization: {}", hex::encode_upper(&response.data));

    let first = response.data.first().copied().unwrap_or_default();
    assert!(
        first.is_ascii_digit(),
        "First byte {:02X} is not a digit: use personalization_layout = \"echoed-instruction\"",
        first
    );
}

/// Counter and balance are little-endian: after a 1-cent credit the low byte moves.
///
/// **Requires**: personalized student card, known PIN, balance below the card limit
#[test]
#[ignore = "requires hardware: personalized student card with known PIN"]
fn test_credit_byte_order() {
    let mut card = open_card();
    let pin = test_pin();

    let before = card.balance_with_pin(&pin).expect("Failed to read balance");
    let receipt = card.credit_cents(&pin, 1).expect("Credit failed");
    let after = card.balance_with_pin(&pin).expect("Failed to read balance");

    println!("Balance {} -> {} (counter {})", before, after, receipt.counter);
    assert_eq!(after, before + 1);
    assert_eq!(card.read_counter().expect("Counter read failed"), receipt.counter + 1);
}
