mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use scanq_core::config::ScanqConfig;
use scanq_core::models::CoreResult;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("scanq: {}", error.message);
            return ExitCode::from(2);
        }
    };
    logging::init(&config.log.filter);

    let outcome = match cli.command {
        Command::Migrate => commands::migrate(&config).await,
        Command::Submit(args) => commands::submit(&config, args).await,
        Command::Worker(args) => commands::worker(&config, args).await,
        Command::Status { task_id } => commands::status(&config, task_id).await,
        Command::History { owner } => commands::history(&config, owner).await,
        Command::Stats => commands::stats(&config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(kind = ?error.kind, message = %error.message, "command failed");
            eprintln!("scanq: {}", error.message);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> CoreResult<ScanqConfig> {
    let mut config = ScanqConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    Ok(config)
}
