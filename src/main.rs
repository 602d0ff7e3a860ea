//! tickrewards CLI entry point.

use anyhow::Result;
use clap::Parser;

use tickrewards::cli::commands::{ledger, rules, sync};
use tickrewards::cli::context::AppContext;
use tickrewards::cli::{handle_error, Cli, Commands};
use tickrewards::infrastructure::logging::{LogConfig, LoggerImpl};
use tickrewards::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json_mode);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&LogConfig::try_from(&config.logging)?)?;

    let ctx = AppContext::open(config).await?;

    match cli.command {
        Commands::Sync(args) => sync::execute(args, ctx, cli.json).await,
        Commands::Rules(args) => rules::execute(args, ctx, cli.json).await,
        Commands::Ledger(args) => ledger::execute(args, ctx, cli.json).await,
    }
}
