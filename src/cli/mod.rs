//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::ledger::LedgerArgs;
use commands::rules::RulesArgs;
use commands::sync::SyncArgs;

#[derive(Parser, Debug)]
#[command(name = "tickrewards", version, about = "Reward points for completed TickTick tasks")]
pub struct Cli {
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .tickrewards/
    #[arg(long, global = true, env = "TICKREWARDS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile with TickTick
    Sync(SyncArgs),
    /// Manage reward rules
    Rules(RulesArgs),
    /// Inspect the points ledger
    Ledger(LedgerArgs),
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
