//! collector - keeps a local store of cycles and transaction records in
//! step with a distributor node.
//!
//! # Quick Start
//!
//! ```bash
//! # Write a starter configuration
//! collector sample-config > collector.toml
//!
//! # Sync everything the distributor has
//! collector --config collector.toml sync
//!
//! # Show what a recovery pass would re-sync, checking every cycle
//! collector --config collector.toml plan --full
//! ```
//!
//! # Commands
//!
//! - **sync**: Fresh start or recovery, then sync all planned batches
//! - **check**: Run the pre-flight anomaly check only
//! - **plan**: Print the recovery plan without syncing
//! - **sample-config**: Print a sample configuration
//!
//! Configuration comes from a TOML file (`--config <FILE>`) with
//! `COLLECTOR_*` environment overrides applied on top.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use collector_app::logging::{self, LogConfig, LogFormat};
use collector_app::{AppConfig, Collector};

/// Sync and recover a local ledger store from a distributor
#[derive(Parser)]
#[command(name = "collector")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Log output format, overriding the config file
    #[arg(long, global = true)]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Log output format for CLI
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogFormat {
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Sync from the distributor, recovering local data first if present
    Sync,

    /// Check local data against the distributor without syncing
    Check,

    /// Print the recovery plan without syncing
    Plan {
        /// Verify every cycle instead of only the lookback windows
        #[arg(long)]
        full: bool,
    },

    /// Print a sample configuration file
    SampleConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig = cli.command {
        print!("{}", AppConfig::sample_config());
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_logging(&cli, &config)?;
    if let Some(ref path) = cli.config {
        tracing::info!(path = ?path, "Loaded configuration from file");
    }

    let collector = Collector::new(config)?;

    match cli.command {
        Commands::Sync => cmd_sync(&collector).await,
        Commands::Check => cmd_check(&collector).await,
        Commands::Plan { full } => cmd_plan(&collector, full).await,
        Commands::SampleConfig => Ok(()),
    }
}

/// CLI flags take precedence over the `[logging]` section.
fn init_logging(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let mut log_config = LogConfig::from_config(&config.logging);

    if let Some(format) = cli.log_format {
        log_config = match LogFormat::from(format) {
            LogFormat::Text => LogConfig {
                level: log_config.level,
                ..LogConfig::default()
            },
            LogFormat::Json => LogConfig {
                level: log_config.level,
                ..LogConfig::json()
            },
        };
    }

    if cli.trace {
        log_config = log_config.with_level("trace");
    } else if cli.verbose {
        log_config = log_config.with_level("debug");
    }

    logging::init(&log_config)
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    match cli.config {
        Some(ref path) => AppConfig::from_file_with_env(path),
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

async fn cmd_sync(collector: &Collector) -> anyhow::Result<()> {
    let report = collector.sync().await?;
    tracing::info!(
        route = ?report.route,
        batches = report.batches,
        cycles = report.stats.cycles_synced,
        receipts = report.stats.receipts_synced,
        original_txs = report.stats.original_txs_synced,
        "Sync pass finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_check(collector: &Collector) -> anyhow::Result<()> {
    let report = collector.check().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        eprintln!("{report}");
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_plan(collector: &Collector, full: bool) -> anyhow::Result<()> {
    match collector.plan(full).await? {
        Some(plan) => println!("{}", serde_json::to_string_pretty(&plan)?),
        None => println!("Nothing to plan: the distributor has no cycles"),
    }
    Ok(())
}
