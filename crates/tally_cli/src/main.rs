//! Tally CLI
//!
//! Command-line front end for a Tally ledger kept in a local data directory
//! and synced through a shared append-only log file.
//!
//! # Commands
//!
//! - `account`, `transfer`, `category`, `savings` - Record changes
//! - `balance`, `categories`, `status` - Read the ledger
//! - `sync` - Pull from and push to the remote log once
//! - `watch` - Sync on a timer until interrupted
//! - `dump-log` - Print remote log rows for debugging

mod commands;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use commands::ledger::{AccountCommand, CategoryCommand, SavingsCommand, TransferCommand};
use commands::{CliError, CliResult, Format, Workspace};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Tally personal-finance ledger.
#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, default_value = ".tally")]
    data_dir: PathBuf,

    /// Path to the shared remote log file
    #[arg(global = true, short, long)]
    remote: Option<PathBuf>,

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

    /// Manage expenses, income and transfers
    #[command(subcommand)]
    Transfer(TransferCommand),

    /// Manage categories
    #[command(subcommand)]
    Category(CategoryCommand),

    /// Manage the initial savings setting
    #[command(subcommand)]
    Savings(SavingsCommand),

    /// Show account balances
    Balance {
        /// Print only this account's balance
        #[arg(long)]
        account: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show totals per category
    Categories {
        /// First date included
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last date included
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show ledger and sync status
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Sync with the remote log once
    Sync {
        /// Retries after a retryable failure
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },

    /// Sync on a timer until interrupted
    Watch {
        /// Seconds between syncs
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
    },

    /// Dump remote log rows for debugging
    DumpLog {
        /// First position (1-based)
        #[arg(long, default_value_t = 1)]
        from: u64,

        /// Maximum number of rows
        #[arg(short, long, default_value_t = 100)]
        limit: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so listings stay machine-readable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_sync() => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let remote = || {
        cli.remote
            .clone()
            .ok_or_else(|| CliError::Usage("remote log path required (--remote)".into()))
    };

    match cli.command {
        Commands::Version => {
            println!("Tally CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tally Core v{}", tally_core::VERSION);
            Ok(())
        }
        Commands::DumpLog {
            from,
            limit,
            format,
        } => commands::sync::dump_log(&remote()?, from, limit, format).await,
        command => {
            let mut workspace = Workspace::open(&cli.data_dir)?;
            match command {
                Commands::Account(cmd) => commands::ledger::account(&workspace, cmd),
                Commands::Transfer(cmd) => commands::ledger::transfer(&workspace, cmd),
                Commands::Category(cmd) => commands::ledger::category(&workspace, cmd),
                Commands::Savings(cmd) => commands::ledger::savings(&workspace, cmd),
                Commands::Balance { account, format } => {
                    commands::report::balance(&workspace, account, format)
                }
                Commands::Categories {
                    since,
                    until,
                    format,
                } => commands::report::categories(&workspace, since, until, format),
                Commands::Status { format } => commands::report::status(&workspace, format),
                Commands::Sync { retries } => {
                    commands::sync::sync(&mut workspace, &remote()?, retries).await
                }
                Commands::Watch { interval } => {
                    commands::sync::watch(&mut workspace, &remote()?, interval).await
                }
                Commands::Version | Commands::DumpLog { .. } => Ok(()),
            }
        }
    }
}
