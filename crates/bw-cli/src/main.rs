use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bw_cli::commands::{import, phases, quality, reconcile, status, summarize, usage};
use bw_cli::{Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(bw_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = bw_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match &cli.command {
        Some(Commands::Import) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            let report = import::run(&mut db)?;
            println!(
                "Imported {} points ({} duplicates)",
                report.inserted, report.skipped
            );
        }
        Some(Commands::Reconcile(args)) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            let mut stdout = io::stdout();
            reconcile::run(&mut stdout, &mut db, &config, args)?;
        }
        Some(Commands::Usage(args)) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            let mut stdout = io::stdout();
            usage::run(&mut stdout, &db, args)?;
        }
        Some(Commands::Summarize(args)) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            let mut stdout = io::stdout();
            summarize::run(&mut stdout, &db, args)?;
        }
        Some(Commands::Phases { file }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            let report = phases::run(&mut db, file)?;
            println!("Loaded {} phases ({} skipped)", report.loaded, report.skipped);
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let mut stdout = io::stdout();
            status::run(&mut stdout, &db, &config)?;
        }
        Some(Commands::Quality(args)) => {
            // Quality only needs config - the participant's telemetry lives remotely
            let config =
                Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
            let mut stdout = io::stdout();
            quality::run(&mut stdout, &config, args)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
