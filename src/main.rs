//! Setlist Sync CLI
//!
//! Usage:
//!   setlist-sync ingest --years 2023,2024 --batch-size 250
//!   setlist-sync reconcile --years 2012,2013
//!   setlist-sync sync                 # ingest then reconcile the default years
//!   setlist-sync export-ids
//!   setlist-sync compare-export --csv json/setlists_external_ids.csv
//!
//! Environment (also read from .env / supabase/.env files):
//!   SUPABASE_URL              - Project URL
//!   SUPABASE_SERVICE_ROLE_KEY - Preferred API key
//!   SUPABASE_ANON_KEY         - Fallback API key
//!   SETLIST_DATA_DIR          - Directory with setlists_{year}.json (default: json)
//!   SETLIST_INGEST_FUNCTION   - Edge function name (default: ingest_raw_data)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use setlist_sync::config::{self, Config};
use setlist_sync::ingest::{self, IngestPolicy, DEFAULT_BATCH_SIZE};
use setlist_sync::reconcile::{compare_export, Reconciler, TierSpec};
use setlist_sync::rest::RestClient;
use setlist_sync::source::{self, DEFAULT_YEARS, EXPORT_CSV_NAME, EXPORT_YEARS};

#[derive(Parser, Debug)]
#[command(name = "setlist-sync")]
#[command(about = "Ingest yearly setlist files and reconcile source, raw and derived tiers")]
struct Cli {
    /// Directory holding setlists_{year}.json (overrides SETLIST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct YearArgs {
    /// Years to process (comma-separated)
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_YEARS)]
    years: Vec<i32>,
}

#[derive(Args, Debug, Clone)]
struct ReportArgs {
    /// Report output path (default: <data-dir>/reconciliation_report.json)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Filter sink rows by year client-side from the embedded showdate
    #[arg(long)]
    client_side_dates: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push source records to the ingestion function
    Ingest {
        #[command(flatten)]
        years: YearArgs,

        /// Records per batch before any splitting
        #[arg(long, env = "SETLIST_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Compare source, raw and derived ids per year
    Reconcile {
        #[command(flatten)]
        years: YearArgs,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Ingest, then reconcile the same years
    Sync {
        #[command(flatten)]
        years: YearArgs,

        #[arg(long, env = "SETLIST_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Write a year,external_id CSV from the source files
    ExportIds {
        /// Output path (default: <data-dir>/setlists_external_ids.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Compare an exported id CSV against every id in the raw sink
    CompareExport {
        /// CSV to compare (default: <data-dir>/setlists_external_ids.csv)
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Where to write the sample files (default: current directory)
        #[arg(long, default_value = ".")]
        sample_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    // Env files first so RUST_LOG and clap `env` fallbacks see them
    config::load_env();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("setlist_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ExportIds { output } => {
            run_export(&data_dir_without_credentials(cli.data_dir), output)?;
        }
        command => {
            let mut config = Config::from_env().context("Failed to load configuration")?;
            if let Some(dir) = cli.data_dir {
                config.data_dir = dir;
            }
            info!(
                "Using {} ({} key), data dir {}",
                config.base_url,
                config.credential.tier(),
                config.data_dir.display()
            );
            let client = RestClient::new(&config)?;
            run_remote(command, &config, &client)?;
        }
    }

    Ok(())
}

fn data_dir_without_credentials(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("SETLIST_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_DATA_DIR))
}

fn run_remote(command: Commands, config: &Config, client: &RestClient) -> Result<()> {
    match command {
        Commands::Ingest { years, batch_size } => {
            run_ingest(config, client, &years.years, batch_size)
        }
        Commands::Reconcile { years, report } => {
            run_reconcile(config, client, &years.years, &report)
        }
        Commands::Sync {
            years,
            batch_size,
            report,
        } => {
            run_ingest(config, client, &years.years, batch_size)?;
            run_reconcile(config, client, &years.years, &report)
        }
        Commands::CompareExport { csv, sample_dir } => {
            let csv = csv.unwrap_or_else(|| config.data_dir.join(EXPORT_CSV_NAME));
            let export_ids = source::read_ids_csv(&csv)
                .with_context(|| format!("Failed to read {}", csv.display()))?;
            let drift = compare_export(client, &TierSpec::raw(false), &export_ids)
                .context("Failed to fetch raw ids")?;
            drift.write_samples(&sample_dir)?;
            info!(
                "Wrote samples: only_in_csv_sample.txt, only_in_bronze_sample.txt -> {}",
                sample_dir.display()
            );
            Ok(())
        }
        Commands::ExportIds { output } => run_export(&config.data_dir, output),
    }
}

fn run_export(data_dir: &Path, output: Option<PathBuf>) -> Result<()> {
    let out = output.unwrap_or_else(|| data_dir.join(EXPORT_CSV_NAME));
    let written = source::export_ids_csv(data_dir, EXPORT_YEARS, &out)
        .with_context(|| format!("Failed to export ids to {}", out.display()))?;
    info!("Wrote {} ids -> {}", written, out.display());
    Ok(())
}

fn run_ingest(
    config: &Config,
    client: &RestClient,
    years: &[i32],
    batch_size: usize,
) -> Result<()> {
    let policy = IngestPolicy::default().with_batch_size(batch_size);

    for &year in years {
        let records = source::load_year_file(&config.data_dir, year)
            .with_context(|| format!("Failed to load source records for {}", year))?;
        info!("Year {}: {} records found", year, records.len());

        let outcome = ingest::ingest(client, &records, &policy)
            .with_context(|| format!("Ingestion failed for {}", year))?;
        info!(
            "Finished {}: success={} total_new={} total_updated={}",
            year, outcome.accepted, outcome.new_count, outcome.updated_count
        );
    }
    Ok(())
}

fn run_reconcile(
    config: &Config,
    client: &RestClient,
    years: &[i32],
    args: &ReportArgs,
) -> Result<()> {
    let source_ids = source::load_source_ids(&config.data_dir, years)
        .context("Failed to load source ids")?;

    let reconciler = Reconciler::new(
        client,
        TierSpec::raw(args.client_side_dates),
        TierSpec::derived(args.client_side_dates),
    );
    let report = reconciler
        .reconcile(years, &source_ids)
        .context("Reconciliation aborted")?;

    let out = args.output.clone().unwrap_or_else(|| config.report_path());
    report
        .write_to(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!("Wrote reconciliation report -> {}", out.display());
    Ok(())
}
