//! Ledger administration and the operator incident queue

use std::path::Path;

use anyhow::Context as _;
use carotte_common::StudentId;
use carotte_kiosk::OperatorQueue;
use carotte_ledger::LegacyEntry;
use rust_decimal::Decimal;
use serde_json::json;

use crate::formatters::{emit, format_account, format_amount, format_entry, format_incident};

use super::Context;

pub fn cmd_register_student(
    ctx: &Context,
    student_id: &str,
    last_name: &str,
    first_name: &str,
) -> anyhow::Result<()> {
    let student = StudentId::parse(student_id)?;
    ctx.ledger()?
        .register_student(&student, last_name, first_name)?;
    emit(ctx.format, &json!({ "registered": student }), |_| {
        println!("Student {} registered with a 0.00 € account", student);
    })
}

pub fn cmd_award_bonus(
    ctx: &Context,
    student_id: &str,
    amount: Decimal,
    comment: &str,
) -> anyhow::Result<()> {
    if amount <= Decimal::ZERO {
        anyhow::bail!("bonus amount must be positive");
    }
    let student = StudentId::parse(student_id)?;
    let entry = ctx.ledger()?.award_bonus(&student, amount, comment)?;
    emit(ctx.format, &json!({ "entry": entry, "amount": amount }), |_| {
        println!(
            "Bonus of {} awarded to {} (row #{})",
            format_amount(amount),
            student,
            entry
        );
    })
}

pub fn cmd_accounts(ctx: &Context) -> anyhow::Result<()> {
    let accounts = ctx.ledger()?.list_accounts()?;
    emit(ctx.format, &accounts, |accounts| {
        if accounts.is_empty() {
            println!("No students registered");
        }
        for account in accounts {
            println!("{}", format_account(account));
        }
    })
}

pub fn cmd_entries(ctx: &Context, student_id: &str) -> anyhow::Result<()> {
    let student = StudentId::parse(student_id)?;
    let ledger = ctx.ledger()?;
    let balance = ledger.balance(&student)?;
    let entries = ledger.entries(&student)?;

    emit(ctx.format, &entries, |entries| {
        for entry in entries {
            println!("{}", format_entry(entry));
        }
        println!("Ledger balance: {}", format_amount(balance));
    })
}

pub fn cmd_import_legacy(ctx: &Context, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let rows: Vec<LegacyEntry> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", file.display()))?;

    let ids = ctx.ledger()?.import_legacy(&rows)?;
    let bonus = rows.iter().filter(|row| row.flags().bonus).count();
    emit(
        ctx.format,
        &json!({ "imported": ids.len(), "bonus_rows": bonus }),
        |_| {
            println!("Imported {} row(s), {} flagged as bonus", ids.len(), bonus);
        },
    )
}

pub fn cmd_incidents(ctx: &Context) -> anyhow::Result<()> {
    let incidents = ctx.operators().incidents()?;
    emit(ctx.format, &incidents, |incidents| {
        if incidents.is_empty() {
            println!("No incident awaiting an operator");
        }
        for incident in incidents {
            println!("{}", format_incident(incident));
        }
    })
}
