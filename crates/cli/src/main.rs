//! librarian - ingest e-books into a classified library
//!
//! Reads `librarian.toml` (or `--config`), with `LIBRARIAN_` environment
//! overrides, and runs one command against the configured library.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use librarian_core::config::LoggingConfig;
use librarian_core::{load_config, validate_config, Config, LogFormat, Pipeline};

mod cmd;

#[derive(Parser)]
#[command(name = "librarian")]
#[command(about = "Identify, classify and file e-books into a library")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path
    #[arg(
        short,
        long,
        global = true,
        env = "LIBRARIAN_CONFIG",
        default_value = "librarian.toml"
    )]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Record every file in the intake area
    Scan,
    /// Enrich, classify and file pending files
    Run(cmd::run::RunArgs),
    /// Re-inspect recorded files, e.g. after a failed run
    Rescan(cmd::run::RescanArgs),
    /// Show catalog and intake counts
    Status(cmd::status::StatusArgs),
    /// Inspect and resolve files held for review
    Review(cmd::review::ReviewArgs),
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.debug, &LoggingConfig::default());
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    init_logging(cli.debug, &config.logging);

    if let Err(e) = run(cli.command, config).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn load(path: &Path) -> Result<Config> {
    let config = load_config(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(debug: bool, logging: &LoggingConfig) {
    let default = if debug {
        "debug".to_string()
    } else {
        logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    if let Command::Config = command {
        return cmd::status::show_config(&config);
    }

    let pipeline = Pipeline::open(config).context("Failed to open library")?;
    match command {
        Command::Scan => cmd::run::scan(&pipeline).await,
        Command::Run(args) => cmd::run::run(args, &pipeline).await,
        Command::Rescan(args) => cmd::run::rescan(args, &pipeline).await,
        Command::Status(args) => cmd::status::run(args, &pipeline),
        Command::Review(args) => cmd::review::run(args, &pipeline).await,
        Command::Config => Ok(()),
    }
}
