use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use scanq_core::models::TaskType;

#[derive(Parser)]
#[command(name = "scanq")]
#[command(about = "Queue, run and inspect sandboxed security scanning tasks")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "SCANQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides configuration)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Submit a task for asynchronous execution
    Submit(SubmitArgs),
    /// Run the worker pool until interrupted
    Worker(WorkerArgs),
    /// Show the reconciled status of a task
    Status {
        task_id: String,
    },
    /// List an owner's tasks, newest first
    History {
        owner: String,
    },
    /// Show task counts by status
    Stats,
}

#[derive(Args)]
pub struct SubmitArgs {
    /// Identifier of the submitting caller
    #[arg(long)]
    pub owner: String,

    #[arg(value_enum)]
    pub kind: SubmitKind,

    /// Command line, URL, scan target, or WHOIS subject
    pub input: String,
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Number of concurrent workers (overrides configuration)
    #[arg(long)]
    pub pool_size: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SubmitKind {
    Command,
    Crawl,
    Scan,
    Whois,
}

impl SubmitKind {
    pub fn task_type(self) -> TaskType {
        match self {
            SubmitKind::Command => TaskType::Command,
            SubmitKind::Crawl => TaskType::Crawl,
            SubmitKind::Scan => TaskType::Scan,
            SubmitKind::Whois => TaskType::WhoisLookup,
        }
    }
}
