//! # Carbon Ledger CLI (`carbon`)
//!
//! ## Usage
//!
//! ```bash
//! carbon --config ./config/carbon.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `carbon init` | Create the SQLite database and schema |
//! | `carbon calculate <file>` | Calculate and record a JSON array of activities |
//! | `carbon report` | Scope totals, net emissions, diversion, intensity, YoY |
//! | `carbon factors list` | Show persisted emission factors |
//! | `carbon factors refresh` | Invalidate persisted factors |
//! | `carbon quota` | Show the provider quota window |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use carbon_ledger::{calculate, config, factors, migrate, report};

/// Carbon Ledger CLI: turn activity data into CO2e ledger entries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/carbon.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "carbon",
    about = "Carbon Ledger: an emission-factor cache and CO2e calculation engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/carbon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables (metric_entries,
    /// emission_factors, quota_state). Running it again is harmless.
    Init,

    /// Calculate emissions for a JSON array of activity records.
    ///
    /// Activities already present in the ledger (same activity hash) are
    /// skipped. Per-activity failures are reported without aborting the
    /// batch.
    Calculate {
        /// JSON file containing an array of activity records.
        file: PathBuf,

        /// Calculate and print, but do not write ledger entries.
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize an organization's ledger for a period.
    ///
    /// Year-over-year change compares with the same period one year earlier.
    Report {
        /// Organization id.
        #[arg(long)]
        org: String,

        /// First day of the period (YYYY-MM-DD).
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period (YYYY-MM-DD).
        #[arg(long)]
        to: NaiveDate,

        /// Intensity denominator (employees, m², revenue, ...).
        #[arg(long)]
        denominator: Option<Decimal>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or invalidate persisted emission factors.
    Factors {
        #[command(subcommand)]
        action: FactorsAction,
    },

    /// Show the factor provider quota window.
    Quota,
}

#[derive(Subcommand)]
enum FactorsAction {
    /// List persisted factors.
    List,

    /// Invalidate a persisted factor so it is fetched again.
    Refresh {
        /// Factor key, e.g. `purchased_electricity/grid/PT/2024/location_based`.
        key: Option<String>,

        /// Invalidate every persisted factor.
        #[arg(long, conflicts_with = "key")]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Calculate { file, dry_run } => {
            calculate::run_calculate(&cfg, &file, dry_run).await?;
        }
        Commands::Report {
            org,
            from,
            to,
            denominator,
            json,
        } => {
            report::run_report(&cfg, &org, from, to, denominator, json).await?;
        }
        Commands::Factors { action } => match action {
            FactorsAction::List => factors::run_factors_list(&cfg).await?,
            FactorsAction::Refresh { key, all } => {
                factors::run_factors_refresh(&cfg, key.as_deref(), all).await?;
            }
        },
        Commands::Quota => factors::run_quota_status(&cfg).await?,
    }

    Ok(())
}
