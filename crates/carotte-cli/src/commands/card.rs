//! Card-only commands: the personalization tool and PIN management

use anyhow::Context as _;
use carotte_card::CardReader;
use carotte_common::{PersonalizationRecord, StudentId};
use serde_json::json;

use crate::formatters::{emit, format_holder};

use super::Context;

pub fn cmd_readers(ctx: &Context) -> anyhow::Result<()> {
    let readers = if ctx.is_simulated() {
        vec!["Simulated Reader 0".to_string()]
    } else {
        CardReader::new()
            .context("failed to establish PC/SC context")?
            .list_readers()?
    };

    emit(ctx.format, &readers, |readers| {
        if readers.is_empty() {
            println!("No reader found");
        }
        for (i, name) in readers.iter().enumerate() {
            println!("{}: {}", i, name);
        }
    })
}

pub fn cmd_version(ctx: &Context) -> anyhow::Result<()> {
    let mut card = ctx.open_card()?;
    let version = card.read_version()?;
    emit(ctx.format, &json!({ "version": version }), |_| {
        println!("Firmware version: {}", version);
    })
}

pub fn cmd_info(ctx: &Context) -> anyhow::Result<()> {
    let mut card = ctx.open_card()?;
    let reader_name = card.session().reader_name().to_string();
    let atr = hex::encode_upper(card.session().atr());
    let version = card.read_version()?;
    let holder = card.read_personalization()?;

    let report = json!({
        "reader": reader_name,
        "atr": atr,
        "version": version,
        "holder": holder,
    });
    emit(ctx.format, &report, |_| {
        println!("Reader:   {}", reader_name);
        println!("ATR:      {}", atr);
        println!("Firmware: {}", version);
        match &holder {
            Some(record) => println!("Holder:   {}", format_holder(record)),
            None => println!("Holder:   (card not assigned)"),
        }
    })
}

pub fn cmd_assign(
    ctx: &Context,
    student_id: &str,
    last_name: &str,
    first_name: &str,
) -> anyhow::Result<()> {
    let student_id = StudentId::parse(student_id)?;
    let record = PersonalizationRecord::new(student_id, last_name, first_name)?;

    let mut card = ctx.open_card()?;
    let puk = card.write_personalization(&record)?;
    let puk = String::from_utf8_lossy(&puk.to_bytes()).into_owned();

    emit(
        ctx.format,
        &json!({ "holder": record, "puk": puk }),
        |_| {
            println!("Card assigned to {}", format_holder(&record));
            println!("PIN reset to 1234");
            println!("PUK: {}  (hand this to the student)", puk);
        },
    )
}

pub fn cmd_change_pin(ctx: &Context, pin: &str, new_pin: &str) -> anyhow::Result<()> {
    let mut card = ctx.open_card()?;
    card.change_pin(pin, new_pin)?;
    emit(ctx.format, &json!({ "pin_changed": true }), |_| {
        println!("PIN changed");
    })
}

pub fn cmd_unblock_pin(ctx: &Context, puk: &str, new_pin: &str) -> anyhow::Result<()> {
    let mut card = ctx.open_card()?;
    card.reset_pin_with_puk(puk, new_pin)?;
    emit(ctx.format, &json!({ "pin_reset": true }), |_| {
        println!("PIN unblocked and replaced");
    })
}
