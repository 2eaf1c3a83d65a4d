//! Command-line arguments.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "phantom-server", about = "Playground DAG scheduler and runner", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recover interrupted runs, then schedule playgrounds until ctrl-c.
    Serve,
    /// Run one playground in the foreground; ctrl-c cancels the run.
    Run {
        playground_id: Uuid,
        /// Limit the run to these tasks (repeatable).
        #[arg(long = "only")]
        only: Vec<Uuid>,
    },
    /// Print the most recent runs of a playground.
    History {
        playground_id: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the next fire offset of a cron expression.
    NextFire {
        cron: String,
        /// Time of day (UTC) to evaluate at; defaults to now.
        #[arg(long, value_name = "HH:MM")]
        at: Option<String>,
    },
}
