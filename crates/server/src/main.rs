mod app_config;
mod cli;
mod db;
mod pg_store;
mod sql_executor;
mod startup;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app_config::init_tracing();

    let cli = Cli::parse();
    let config = app_config::load_config();

    match cli.command {
        Command::Serve => {
            config.log_summary();
            startup::serve(&config).await?;
            info!("Scheduler stopped");
        }
        Command::Run { playground_id, only } => startup::run_once(&config, playground_id, only).await?,
        Command::History { playground_id, limit } => startup::history(&config, playground_id, limit).await?,
        Command::NextFire { cron, at } => startup::next_fire(&cron, at.as_deref())?,
    }

    Ok(())
}
