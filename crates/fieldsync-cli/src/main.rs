//! fieldsync CLI - operate a device's inventory store and sync it with peers
//!
//! Export and import packages, preview merges, and run live peer sessions over
//! the LAN transport.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{load_config, PathOverrides};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::export::run_export;
use crate::commands::import::run_import;
use crate::commands::preview::run_merge_preview;
use crate::commands::status::run_status;
use crate::commands::sync::{run_serve, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let overrides = PathOverrides {
        config: cli.config,
        db_path: cli.db_path,
        storage_root: cli.storage_root,
    };

    match cli.command {
        Commands::Export {
            output,
            no_attachments,
        } => {
            let config = load_config(&overrides)?;
            run_export(&config, output.as_deref(), no_attachments).await?;
        }
        Commands::Import {
            path,
            validated,
            json,
        } => {
            let config = load_config(&overrides)?;
            run_import(&config, &path, validated, json).await?;
        }
        Commands::MergePreview { path, json } => {
            let config = load_config(&overrides)?;
            run_merge_preview(&config, &path, json).await?;
        }
        Commands::Serve => run_serve(load_config(&overrides)?).await?,
        Commands::Sync { peer, timeout } => {
            run_sync(load_config(&overrides)?, &peer, timeout).await?;
        }
        Commands::Status { json } => run_status(&load_config(&overrides)?, json)?,
        Commands::Config { command } => run_config(command, &overrides)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
