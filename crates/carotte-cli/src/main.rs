use std::path::PathBuf;
use std::process::ExitCode;

use carotte_common::parse_amount;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

mod commands;
mod formatters;

use commands::Context;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "carotte")]
#[command(about = "Student card kiosk - top-up, vending, personalization and ledger tools")]
#[command(version)]
struct Args {
    /// Kiosk configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run against a simulated card persisted in this JSON file
    #[arg(long, global = true, value_name = "STATE_JSON")]
    simulate: Option<PathBuf>,

    /// Output format mode
    #[arg(short, long, global = true, value_enum, default_value_t = FormatMode::Human)]
    format: FormatMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List PC/SC readers
    Readers,

    /// Read the card firmware version
    Version,

    /// Show reader, ATR and card holder (no PIN needed)
    Info,

    /// Personalize a card and print its PUK
    Assign {
        student_id: String,
        last_name: String,
        first_name: String,
    },

    /// Show the card balance and pending bonus
    Balance {
        #[arg(long)]
        pin: String,
    },

    /// Credit the card with a paid amount
    TopUp {
        #[arg(long)]
        pin: String,
        /// Amount in euros, e.g. 5.00
        #[arg(value_parser = parse_amount)]
        amount: Decimal,
    },

    /// Buy a product from the vending configuration
    Buy {
        #[arg(long)]
        pin: String,
        product: String,
    },

    /// List the products sold by this terminal
    Products,

    /// Move pending ledger bonus onto the card
    TransferBonus {
        #[arg(long)]
        pin: String,
    },

    /// Credit a starting amount on a card that holds nothing yet
    InitialBalance {
        #[arg(long)]
        pin: String,
        /// Amount in euros, 1.00 when omitted
        #[arg(value_parser = parse_amount)]
        amount: Option<Decimal>,
    },

    /// Change the card PIN
    ChangePin {
        #[arg(long)]
        pin: String,
        #[arg(long)]
        new_pin: String,
    },

    /// Unblock the PIN with the PUK and set a new one
    UnblockPin {
        #[arg(long)]
        puk: String,
        #[arg(long)]
        new_pin: String,
    },

    /// Create a ledger account at 0.00
    RegisterStudent {
        student_id: String,
        last_name: String,
        first_name: String,
    },

    /// Award a bonus to be transferred at the next kiosk visit
    AwardBonus {
        student_id: String,
        #[arg(value_parser = parse_amount)]
        amount: Decimal,
        #[arg(long, default_value = "Bonus")]
        comment: String,
    },

    /// List students with their ledger balance
    Accounts,

    /// List the ledger rows of one student
    Entries { student_id: String },

    /// Import rows exported from the legacy ledger (JSON array)
    ImportLegacy { file: PathBuf },

    /// List card/ledger divergences awaiting an operator
    Incidents,
}

fn main() -> ExitCode {
    // Initialize tracing subscriber with environment-based filtering
    // Set RUST_LOG=debug for detailed logs, including every APDU header
    // Default: info level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let ctx = Context::load(args.config.as_deref(), args.simulate, args.format)?;

    let result = match args.command {
        Command::Readers => commands::card::cmd_readers(&ctx),
        Command::Version => commands::card::cmd_version(&ctx),
        Command::Info => commands::card::cmd_info(&ctx),
        Command::Assign {
            student_id,
            last_name,
            first_name,
        } => commands::card::cmd_assign(&ctx, &student_id, &last_name, &first_name),
        Command::Balance { pin } => commands::kiosk::cmd_balance(&ctx, &pin),
        Command::TopUp { pin, amount } => commands::kiosk::cmd_top_up(&ctx, &pin, amount),
        Command::Buy { pin, product } => commands::kiosk::cmd_buy(&ctx, &pin, &product),
        Command::Products => commands::kiosk::cmd_products(&ctx),
        Command::TransferBonus { pin } => commands::kiosk::cmd_transfer_bonus(&ctx, &pin),
        Command::InitialBalance { pin, amount } => {
            commands::kiosk::cmd_initial_balance(&ctx, &pin, amount)
        }
        Command::ChangePin { pin, new_pin } => commands::card::cmd_change_pin(&ctx, &pin, &new_pin),
        Command::UnblockPin { puk, new_pin } => {
            commands::card::cmd_unblock_pin(&ctx, &puk, &new_pin)
        }
        Command::RegisterStudent {
            student_id,
            last_name,
            first_name,
        } => commands::ledger::cmd_register_student(&ctx, &student_id, &last_name, &first_name),
        Command::AwardBonus {
            student_id,
            amount,
            comment,
        } => commands::ledger::cmd_award_bonus(&ctx, &student_id, amount, &comment),
        Command::Accounts => commands::ledger::cmd_accounts(&ctx),
        Command::Entries { student_id } => commands::ledger::cmd_entries(&ctx, &student_id),
        Command::ImportLegacy { file } => commands::ledger::cmd_import_legacy(&ctx, &file),
        Command::Incidents => commands::ledger::cmd_incidents(&ctx),
    };

    // The simulated card keeps PIN tries and counter even when the command failed.
    ctx.save_simulation()?;
    result
}
