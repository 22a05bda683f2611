//! Top-up terminal and vending machine commands

use carotte_common::{from_minor_units, to_minor_units, AmountError};
use carotte_kiosk::{KioskError, DEFAULT_INITIAL_BALANCE_CENTS};
use rust_decimal::Decimal;
use serde_json::json;

use crate::formatters::{
    emit, format_amount, format_balance, format_holder, warn_if_unreconciled,
};

use super::Context;

pub fn cmd_balance(ctx: &Context, pin: &str) -> anyhow::Result<()> {
    let coordinator = ctx.coordinator()?;
    let mut card = ctx.open_card()?;
    let balance = coordinator.balance(&mut card, pin)?;

    let report = json!({
        "holder": balance.holder,
        "balance": from_minor_units(balance.balance_cents),
        "pending_bonus": balance.pending_bonus,
    });
    emit(ctx.format, &report, |_| {
        println!("{}", format_holder(&balance.holder));
        println!("Balance: {}", format_balance(balance.balance_cents));
        match balance.pending_bonus {
            Some(bonus) if bonus > Decimal::ZERO => {
                println!("Bonus waiting: {} (use transfer-bonus)", format_amount(bonus));
            }
            Some(_) => {}
            None => println!("Bonus: ledger unavailable"),
        }
    })
}

pub fn cmd_top_up(ctx: &Context, pin: &str, amount: Decimal) -> anyhow::Result<()> {
    let coordinator = ctx.coordinator()?;
    let mut card = ctx.open_card()?;
    let result = coordinator.top_up(&mut card, pin, amount)?;
    warn_if_unreconciled(&result);

    let outcome = result.outcome();
    let report = json!({
        "student_id": outcome.student_id,
        "amount": outcome.amount,
        "counter": outcome.receipt.counter,
        "ledger_recorded": result.is_settled(),
    });
    emit(ctx.format, &report, |_| {
        println!(
            "Credited {} to {}",
            format_amount(outcome.amount),
            outcome.student_id
        );
    })
}

pub fn cmd_buy(ctx: &Context, pin: &str, product_id: &str) -> anyhow::Result<()> {
    let product = ctx
        .config
        .vending
        .product(product_id)
        .ok_or_else(|| KioskError::UnknownProduct(product_id.to_string()))?;

    let coordinator = ctx.coordinator()?;
    let mut card = ctx.open_card()?;
    let result = coordinator.purchase(&mut card, pin, product)?;
    warn_if_unreconciled(&result);

    let outcome = result.outcome();
    let report = json!({
        "student_id": outcome.student_id,
        "product": outcome.product.id,
        "price": from_minor_units(outcome.product.price_cents),
        "counter": outcome.receipt.counter,
        "ledger_recorded": result.is_settled(),
    });
    emit(ctx.format, &report, |_| {
        println!(
            "{} served, {} debited",
            outcome.product.name,
            format_balance(outcome.product.price_cents)
        );
    })
}

pub fn cmd_products(ctx: &Context) -> anyhow::Result<()> {
    emit(ctx.format, &ctx.config.vending.products, |products| {
        for product in products {
            println!(
                "{:<12} {:<20} {:>8}",
                product.id,
                product.name,
                format_balance(product.price_cents)
            );
        }
    })
}

pub fn cmd_transfer_bonus(ctx: &Context, pin: &str) -> anyhow::Result<()> {
    let coordinator = ctx.coordinator()?;
    let mut card = ctx.open_card()?;
    let result = coordinator.transfer_bonus(&mut card, pin)?;
    warn_if_unreconciled(&result);

    let outcome = result.outcome();
    let report = json!({
        "student_id": outcome.student_id,
        "amount": outcome.amount,
        "transferred_count": outcome.transferred_count,
        "counter": outcome.receipt.counter,
        "ledger_recorded": result.is_settled(),
    });
    emit(ctx.format, &report, |_| {
        println!(
            "Bonus of {} transferred to the card ({} ledger row(s))",
            format_amount(outcome.amount),
            outcome.transferred_count
        );
    })
}

pub fn cmd_initial_balance(
    ctx: &Context,
    pin: &str,
    amount: Option<Decimal>,
) -> anyhow::Result<()> {
    let cents = initial_balance_cents(amount)?;
    let coordinator = ctx.coordinator()?;
    let mut card = ctx.open_card()?;
    let result = coordinator.initial_balance(&mut card, pin, cents)?;
    warn_if_unreconciled(&result);

    let outcome = result.outcome();
    let report = json!({
        "student_id": outcome.student_id,
        "amount": outcome.amount,
        "ledger_recorded": result.is_settled(),
    });
    emit(ctx.format, &report, |_| {
        println!(
            "Initial balance of {} credited to {}",
            format_amount(outcome.amount),
            outcome.student_id
        );
    })
}

fn initial_balance_cents(amount: Option<Decimal>) -> Result<u16, AmountError> {
    amount.map_or(Ok(DEFAULT_INITIAL_BALANCE_CENTS), to_minor_units)
}
