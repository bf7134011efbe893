use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;
mod config;
mod domain;
mod error;
mod infrastructure;
mod services;
mod tools;
mod ui;

#[cfg(test)]
mod test_support;

use cli::{Cli, Commands, ProvisionCommands, ReleaseCommands, SecretCommands};
use commands::{provision, release, secret};
use config::DeployConfig;
use services::ReleaseRequest;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false) // Disable ANSI escape codes for cleaner output
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::print_error(&format!("{:#}", e));
            if error::is_invalid_invocation(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = DeployConfig::load(&cli.config)?;

    match cli.command {
        Commands::Provision { command } => match command {
            ProvisionCommands::Plan { destroy } => {
                provision::plan(&config, destroy).await?;
            }
            ProvisionCommands::Apply => {
                provision::apply(&config).await?;
            }
            ProvisionCommands::Destroy => {
                provision::destroy(&config).await?;
            }
        },
        Commands::Release { command } => match command {
            ReleaseCommands::Start {
                services,
                revision,
                commit,
                token,
            } => {
                let request = ReleaseRequest {
                    services,
                    revision,
                    commit_sha: commit,
                };
                release::start(&config, request, token).await?;
            }
            ReleaseCommands::Status { release_id, json } => {
                release::status(&config, &release_id, json).await?;
            }
            ReleaseCommands::List { limit } => {
                release::list(&config, limit).await?;
            }
            ReleaseCommands::Cancel { release_id, force } => {
                release::cancel(&config, &release_id, force).await?;
            }
        },
        Commands::Secret { command } => match command {
            SecretCommands::Put { name, from_env } => {
                secret::put(&config, &name, &from_env).await?;
            }
            SecretCommands::Show { name } => {
                secret::show(&config, &name).await?;
            }
        },
    }

    Ok(())
}
