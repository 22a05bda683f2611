//! Output formatting for humans and scripts

use carotte_common::{format_cents, PersonalizationRecord};
use carotte_kiosk::{Incident, IncidentKind, Reconciled};
use carotte_ledger::{AccountSummary, EntryKind, LedgerEntry};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Human-readable formatted output
    Human,
    /// One JSON document per command
    Json,
}

/// Print `value` as JSON, or let `human` print it.
pub fn emit<T: Serialize>(mode: FormatMode, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    match mode {
        FormatMode::Json => println!("{}", serde_json::to_string_pretty(value)?),
        FormatMode::Human => human(value),
    }
    Ok(())
}

pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2} €", amount)
}

pub fn format_balance(cents: u16) -> String {
    format!("{} €", format_cents(cents))
}

pub fn format_holder(record: &PersonalizationRecord) -> String {
    format!(
        "{} {} ({})",
        record.first_name, record.last_name, record.student_id
    )
}

pub fn format_entry(entry: &LedgerEntry) -> String {
    let sign = match entry.kind {
        EntryKind::Credit => '+',
        EntryKind::Debit => '-',
    };
    let mut flags = Vec::new();
    if entry.bonus {
        flags.push("bonus");
    }
    if entry.transferred {
        flags.push("transferred");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!(
        "#{:<6} {}{:>9}  {}{}  @{}",
        entry.id,
        sign,
        format_amount(entry.amount),
        entry.comment,
        flags,
        entry.timestamp_ns / 1_000_000_000
    )
}

pub fn format_account(account: &AccountSummary) -> String {
    format!(
        "{}  {:<20} {:<20} {:>10}",
        account.student_id,
        account.last_name,
        account.first_name,
        format_amount(account.balance)
    )
}

pub fn incident_label(kind: IncidentKind) -> &'static str {
    match kind {
        IncidentKind::TopUp => "top-up",
        IncidentKind::Purchase => "purchase",
        IncidentKind::BonusTransfer => "bonus transfer",
        IncidentKind::InitialBalance => "initial balance",
    }
}

pub fn format_incident(incident: &Incident) -> String {
    format!(
        "@{} {} {} {} on {} (card counter {}): {}",
        incident.timestamp_ns / 1_000_000_000,
        incident_label(incident.kind),
        incident.student_id,
        format_amount(incident.amount),
        incident.terminal,
        incident.card_counter,
        incident.detail
    )
}

/// Warn on stderr when the card moved money the ledger did not record.
pub fn warn_if_unreconciled<T>(result: &Reconciled<T>) {
    if let Some(incident) = result.incident() {
        eprintln!("WARNING: the card was updated but the ledger was not.");
        eprintln!("         An operator incident has been queued: {}", incident.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carotte_common::StudentId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_entry() {
        let entry = LedgerEntry {
            id: 12,
            student_id: StudentId::parse("42").unwrap(),
            amount: dec!(3.5),
            kind: EntryKind::Credit,
            comment: "Bonus".to_string(),
            bonus: true,
            transferred: false,
            timestamp_ns: 1_700_000_000_123_456_789,
        };
        assert_eq!(
            format_entry(&entry),
            "#12     +   3.50 €  Bonus [bonus]  @1700000000"
        );
    }

    #[test]
    fn test_format_balance() {
        assert_eq!(format_balance(5), "0.05 €");
        assert_eq!(format_amount(dec!(20)), "20.00 €");
    }
}
