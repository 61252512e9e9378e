//! Ledger CLI
//!
//! Keeps a ledger on disk, syncs it with a server, and runs that server.
//!
//! # Commands
//!
//! - `add`, `edit`, `delete` - Change items in the local ledger
//! - `list`, `month` - Show items and monthly totals
//! - `export` - Write active items as CSV
//! - `sync` - Sync the local ledger with a server
//! - `serve` - Run the sync server
//! - `token` - Issue a session token for a caller
//! - `compact` - Rewrite a log without superseded frames

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first ledger with watermark sync.
#[derive(Parser)]
#[command(name = "ledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the ledger's data files
    #[arg(global = true, short, long, default_value = "ledger-data")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new item
    Add {
        /// What the money was spent on
        subject: String,

        /// Amount in the smallest currency unit
        #[arg(allow_negative_numbers = true)]
        amount: i64,

        /// Booking date (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Change an item
    Edit {
        /// Item id
        id: String,

        /// New subject
        #[arg(short, long)]
        subject: Option<String>,

        /// New amount
        #[arg(short, long, allow_negative_numbers = true)]
        amount: Option<i64>,

        /// New booking date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Delete an item
    Delete {
        /// Item id
        id: String,
    },

    /// List active items
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one month's items and total, or list months with items
    Month {
        /// Month to show (YYYY-MM)
        month: Option<String>,
    },

    /// Write active items as CSV
    Export {
        /// Output file (default stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sync with a server
    Sync {
        /// Server URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Session token
        #[arg(short, long, env = "LEDGER_TOKEN", conflicts_with = "caller")]
        token: Option<String>,

        /// Caller identity, for servers without session tokens
        #[arg(short, long)]
        caller: Option<String>,

        /// Keep syncing on an interval until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "10")]
        interval: u64,
    },

    /// Run the sync server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Session token secret; tokens are required when set
        #[arg(short, long, env = "LEDGER_SECRET")]
        secret: Option<String>,

        /// Callers allowed to sync (repeatable; default everyone)
        #[arg(long = "permit")]
        permitted: Vec<String>,

        /// Maximum records per request
        #[arg(long, default_value = "1000")]
        max_batch: usize,
    },

    /// Issue a session token
    Token {
        /// Caller identity
        identity: String,

        /// Session token secret
        #[arg(short, long, env = "LEDGER_SECRET")]
        secret: String,

        /// Token lifetime in hours
        #[arg(short, long, default_value = "24")]
        expiry_hours: u64,
    },

    /// Compact the local log, or the server log with --server
    Compact {
        /// Compact the server's log instead of the local one
        #[arg(long)]
        server: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Add {
            subject,
            amount,
            date,
        } => commands::items::add(&cli.path, &subject, amount, date.as_deref())?,
        Commands::Edit {
            id,
            subject,
            amount,
            date,
        } => commands::items::edit(&cli.path, &id, subject, amount, date.as_deref())?,
        Commands::Delete { id } => commands::items::delete(&cli.path, &id)?,
        Commands::List { format } => commands::items::list(&cli.path, &format)?,
        Commands::Month { month } => commands::items::month(&cli.path, month.as_deref())?,
        Commands::Export { output } => commands::items::export(&cli.path, output.as_deref())?,
        Commands::Sync {
            server,
            token,
            caller,
            watch,
            interval,
        } => commands::sync::run(
            &cli.path,
            commands::sync::SyncArgs {
                server,
                token,
                caller,
                watch,
                interval,
            },
        )?,
        Commands::Serve {
            bind,
            secret,
            permitted,
            max_batch,
        } => commands::serve::run(&cli.path, bind, secret, permitted, max_batch)?,
        Commands::Token {
            identity,
            secret,
            expiry_hours,
        } => commands::token::run(&identity, &secret, expiry_hours)?,
        Commands::Compact { server } => commands::compact::run(&cli.path, server)?,
    }

    Ok(())
}
