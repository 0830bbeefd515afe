//! LedgerSync CLI
//!
//! Bookkeeping on a local store, and sync against a reconciler that lives
//! in a second store directory.
//!
//! # Commands
//!
//! - `account add|list|update` - Manage accounts
//! - `sale`, `finalize` - Record transactions
//! - `pay`, `adjust` - Record payments and corrections
//! - `ledger`, `balance`, `recalculate`, `audit` - Inspect and repair balances
//! - `overdue`, `debtors` - Collections reports
//! - `status`, `sync`, `remote-balance` - Sync with a remote
//! - `migrate` - Apply schema migrations

mod commands;
mod settings;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use commands::account::StatusArg;
use commands::pay::DirectionArg;
use commands::sale::{KindArg, SaleOptions};
use commands::{Context, Format};
use ledgersync_protocol::LineItem;
use settings::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LedgerSync command-line bookkeeping tools.
#[derive(Parser)]
#[command(name = "ledgersync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long, default_value = "ledgersync-data")]
    store: PathBuf,

    /// JSON settings file
    #[arg(global = true, long)]
    settings: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value = "text")]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommand),

    /// Record a sale or purchase
    Sale {
        /// Account id
        account: String,

        /// Line item as name:quantity:price (repeatable)
        #[arg(short, long = "item", required = true, value_parser = commands::sale::parse_item)]
        items: Vec<LineItem>,

        /// Sale or purchase
        #[arg(short, long, value_enum, default_value = "sale")]
        kind: KindArg,

        /// Save as a draft without ledger effect
        #[arg(long)]
        draft: bool,

        /// Amount paid up front
        #[arg(long, default_value = "0")]
        paid: u64,

        /// Tax rate in whole percent
        #[arg(long, default_value = "0")]
        tax: u32,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,

        /// Notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Finalize a draft transaction
    Finalize {
        /// Transaction id
        transaction: String,
    },

    /// Record a payment
    Pay {
        /// Account id
        account: String,

        /// Amount in minor units
        amount: u64,

        /// Transaction the payment settles
        #[arg(long)]
        against: Option<String>,

        /// cash, upi or bank_transfer
        #[arg(short, long, default_value = "cash")]
        method: String,

        /// Note
        #[arg(long)]
        note: Option<String>,
    },

    /// Post a manual ledger correction
    Adjust {
        /// Account id
        account: String,

        /// credit or debit
        #[arg(value_enum)]
        direction: DirectionArg,

        /// Amount in minor units
        amount: u64,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show an account's ledger
    Ledger {
        /// Account id
        account: String,
    },

    /// Show an account's balance computed from its ledger
    Balance {
        /// Account id
        account: String,
    },

    /// Rewrite cached balances from the ledger
    Recalculate {
        /// Account id
        account: Option<String>,

        /// Repair every drifted account
        #[arg(short, long, conflicts_with = "account")]
        all: bool,
    },

    /// List accounts whose cached balance disagrees with the ledger
    Audit,

    /// Flag open transactions past their due date
    Overdue {
        /// Reference date (defaults to today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Accounts owing the most
    Debtors {
        /// How many to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show pending sync work
    Status,

    /// Push pending work to a remote store directory
    Sync {
        /// Remote store directory
        #[arg(short, long)]
        remote: PathBuf,
    },

    /// Show an account's balance on the remote
    RemoteBalance {
        /// Remote store directory
        #[arg(short, long)]
        remote: PathBuf,

        /// Account id
        account: String,
    },

    /// Apply schema migrations
    Migrate {
        /// Show what would be applied
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Create an account
    Add {
        /// Display name
        name: String,

        /// Phone
        #[arg(long)]
        phone: Option<String>,

        /// Address
        #[arg(long)]
        address: Option<String>,
    },

    /// List accounts
    List,

    /// Update an account
    Update {
        /// Account id
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New phone
        #[arg(long)]
        phone: Option<String>,

        /// New address
        #[arg(long)]
        address: Option<String>,

        /// New status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        store_dir: cli.store,
        settings: Settings::load(cli.settings.as_deref())?,
        format: cli.format,
    };

    match cli.command {
        Commands::Account(AccountCommand::Add {
            name,
            phone,
            address,
        }) => {
            commands::account::add(&ctx, &name, phone, address)?;
        }
        Commands::Account(AccountCommand::List) => {
            commands::account::list(&ctx)?;
        }
        Commands::Account(AccountCommand::Update {
            id,
            name,
            phone,
            address,
            status,
        }) => {
            commands::account::update(&ctx, &id, name, phone, address, status)?;
        }
        Commands::Sale {
            account,
            items,
            kind,
            draft,
            paid,
            tax,
            due,
            notes,
        } => {
            let options = SaleOptions {
                kind,
                draft,
                paid,
                tax_percent: tax,
                due,
                notes,
            };
            commands::sale::create(&ctx, &account, items, options)?;
        }
        Commands::Finalize { transaction } => {
            commands::sale::finalize(&ctx, &transaction)?;
        }
        Commands::Pay {
            account,
            amount,
            against,
            method,
            note,
        } => {
            commands::pay::pay(&ctx, &account, amount, against, &method, note)?;
        }
        Commands::Adjust {
            account,
            direction,
            amount,
            description,
        } => {
            commands::pay::adjust(&ctx, &account, direction, amount, description)?;
        }
        Commands::Ledger { account } => {
            commands::ledger::ledger(&ctx, &account)?;
        }
        Commands::Balance { account } => {
            commands::ledger::balance(&ctx, &account)?;
        }
        Commands::Recalculate { account, all } => {
            commands::ledger::recalculate(&ctx, account.as_deref(), all)?;
        }
        Commands::Audit => {
            commands::ledger::audit(&ctx)?;
        }
        Commands::Overdue { today } => {
            commands::ledger::overdue(&ctx, today)?;
        }
        Commands::Debtors { limit } => {
            commands::ledger::debtors(&ctx, limit)?;
        }
        Commands::Status => {
            commands::sync::status(&ctx)?;
        }
        Commands::Sync { remote } => {
            commands::sync::sync(&ctx, &remote)?;
        }
        Commands::RemoteBalance { remote, account } => {
            commands::sync::remote_balance(&ctx, &remote, &account)?;
        }
        Commands::Migrate { dry_run } => {
            commands::migrate::run(&ctx, dry_run)?;
        }
        Commands::Version => {
            println!("LedgerSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("LedgerSync Core v{}", ledgersync_core::VERSION);
        }
    }

    Ok(())
}
