//! Ledger inspection CLI commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::LedgerEntry;
use crate::domain::ports::ReconciliationStore;

#[derive(Args, Debug)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommands,
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Show the current points balance
    Balance,
    /// List recent ledger entries, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct BalanceOutput {
    pub balance: i64,
}

impl CommandOutput for BalanceOutput {
    fn to_human(&self) -> String {
        format!("Balance: {} points", self.balance)
    }
}

#[derive(Debug, Serialize)]
pub struct EntryOutput {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub amount: i64,
    pub source: String,
    pub reason: String,
    pub task_id: Option<String>,
}

impl From<&LedgerEntry> for EntryOutput {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            created_at: entry.created_at,
            amount: entry.amount,
            source: entry.source.as_str().to_string(),
            reason: entry.reason.clone(),
            task_id: entry.related_task_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryListOutput {
    pub entries: Vec<EntryOutput>,
    pub balance: i64,
}

impl CommandOutput for EntryListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["when", "amount", "source", "reason"]);
        for entry in &self.entries {
            table.add_row(vec![
                entry.created_at.format("%Y-%m-%d %H:%M").to_string(),
                format!("{:+}", entry.amount),
                entry.source.clone(),
                truncate(&entry.reason, 50),
            ]);
        }
        format!(
            "{}\n\nBalance: {} points",
            render_list("entry", &table, self.entries.len()),
            self.balance
        )
    }
}

pub async fn execute(args: LedgerArgs, ctx: AppContext, json_mode: bool) -> Result<()> {
    let store = ctx.store.clone();

    match args.command {
        LedgerCommands::Balance => {
            output(&BalanceOutput { balance: store.balance().await? }, json_mode);
        }
        LedgerCommands::List { limit } => {
            let entries = store.list_ledger(limit).await?;
            let out = EntryListOutput {
                entries: entries.iter().map(EntryOutput::from).collect(),
                balance: store.balance().await?,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
