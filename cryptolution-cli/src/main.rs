//! Cryptolution CLI: collect, pairs and inspect commands.
//!
//! Commands:
//! - `collect`: fetch the missing OHLC buckets of every pair and rewrite the dataset
//! - `pairs`: list the cleaned asset pair directory, optionally writing the pairs file
//! - `inspect`: report schema validity, coverage and duplicate keys of the stored dataset

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cryptolution_core::config::CollectorConfig;
use cryptolution_core::data::ingest::{build_directory, load_existing_or_empty};
use cryptolution_core::data::pairs::write_pairs_file;
use cryptolution_core::data::validate::{find_duplicate_keys, pair_coverage};
use cryptolution_core::data::{
    open_store, run_ingest, AssetNames, Credentials, DatasetOrigin, IngestSummary,
    KrakenProvider, PairOutcome, TracingProgress,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cryptolution",
    about = "Cryptolution CLI: differential OHLC collection from Kraken"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new buckets for every pair and rewrite the dataset.
    Collect {
        /// Dataset location (local path or http(s) URL). Overrides the config.
        #[arg(long)]
        storage_path: Option<String>,

        /// Bucket width in minutes. Overrides the config.
        #[arg(long)]
        interval_minutes: Option<u32>,

        /// Maximum number of pairs processed. Overrides the config.
        #[arg(long)]
        max_pairs: Option<usize>,

        /// Also rewrite the pairs file.
        #[arg(long, default_value_t = false)]
        update_pairs: bool,
    },
    /// List the cleaned asset pair directory.
    Pairs {
        /// Keep every quote currency, not only the configured ones.
        #[arg(long, default_value_t = false)]
        all_currencies: bool,

        /// Asset name mapping JSON, for display names. Overrides the config.
        #[arg(long)]
        names: Option<PathBuf>,

        /// Write the pairs file.
        #[arg(long, default_value_t = false)]
        write: bool,
    },
    /// Report on the stored dataset.
    Inspect {
        /// Dataset location. Overrides the config.
        #[arg(long)]
        storage_path: Option<String>,

        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            storage_path,
            interval_minutes,
            max_pairs,
            update_pairs,
        } => {
            let mut config = config;
            if let Some(path) = storage_path {
                config.storage_path = path;
            }
            if let Some(minutes) = interval_minutes {
                config.interval_minutes = minutes;
            }
            if max_pairs.is_some() {
                config.max_pairs = max_pairs;
            }
            config.validate()?;
            run_collect(&config, update_pairs)
        }
        Commands::Pairs {
            all_currencies,
            names,
            write,
        } => run_pairs(&config, all_currencies, names, write),
        Commands::Inspect { storage_path, json } => {
            let location = storage_path.unwrap_or_else(|| config.storage_path.clone());
            run_inspect(&location, json)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CollectorConfig> {
    match path {
        Some(path) => CollectorConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(CollectorConfig::default()),
    }
}

fn build_provider(config: &CollectorConfig) -> Result<KrakenProvider> {
    let credentials = Credentials::resolve(
        config.credentials.key_file.as_deref(),
        &config.credentials.env_var,
    );
    if credentials.is_anonymous() {
        info!("no API key configured, using public endpoints anonymously");
    }
    Ok(KrakenProvider::new(&config.api_base_url, credentials)?)
}

fn run_collect(config: &CollectorConfig, update_pairs: bool) -> Result<()> {
    let provider = build_provider(config)?;
    let store = open_store(&config.storage_path)?;
    let options = config.ingest_options(update_pairs);

    let summary = run_ingest(&provider, store.as_ref(), &options, &TracingProgress)
        .context("ingestion run failed, stored dataset left untouched")?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!();
    println!("=== Collection Summary ===");
    println!("Dataset:       {}", summary.location);
    match &summary.origin {
        DatasetOrigin::Loaded { rows } => println!("Started from:  {rows} stored rows"),
        DatasetOrigin::Missing => println!("Started from:  empty (no stored dataset)"),
        DatasetOrigin::SchemaReset { found } => {
            println!("Started from:  empty (stored header {found:?} rejected)")
        }
    }
    println!("Pairs:         {}", summary.pairs_total);
    println!("Rows appended: {}", summary.rows_appended);
    println!("Rows total:    {}", summary.rows_total);
    println!("Elapsed:       {} ms", summary.elapsed_ms);
    println!("Dataset hash:  {}", &summary.dataset_hash[..16.min(summary.dataset_hash.len())]);

    let rejected: Vec<(&str, &str)> = summary
        .outcomes
        .iter()
        .filter_map(|(pair, outcome)| match outcome {
            PairOutcome::Rejected { reason } => Some((pair.as_str(), reason.as_str())),
            _ => None,
        })
        .collect();
    if !rejected.is_empty() {
        println!();
        println!("Skipped pairs ({}):", rejected.len());
        for (pair, reason) in rejected {
            println!("  {pair:<12} {reason}");
        }
    }
    if summary.duplicate_keys > 0 {
        println!();
        println!(
            "WARNING: {} duplicate (asset_pair, tmsp) keys in the dataset",
            summary.duplicate_keys
        );
    }
}

fn run_pairs(
    config: &CollectorConfig,
    all_currencies: bool,
    names_path: Option<PathBuf>,
    write: bool,
) -> Result<()> {
    let provider = build_provider(config)?;
    let mut options = config.ingest_options(false);
    if all_currencies {
        options.keep_common_currencies = false;
    }
    let directory = build_directory(&provider, &options)?;

    let names = match names_path.or_else(|| config.asset_names_file.clone()) {
        Some(path) => AssetNames::from_file(&path)
            .with_context(|| format!("loading asset names {}", path.display()))?,
        None => AssetNames::default(),
    };

    println!("{:<14} {:<14} {:<8} {:<8} {}", "Pair", "Wsname", "Asset", "Currency", "Name");
    println!("{}", "-".repeat(64));
    for pair in directory.iter() {
        println!(
            "{:<14} {:<14} {:<8} {:<8} {}",
            pair.id,
            pair.wsname,
            pair.asset,
            pair.currency,
            names.display_name(&pair.asset)
        );
    }
    println!("\n{} pairs", directory.len());

    if write {
        write_pairs_file(&config.pairs_file, &directory)?;
        println!("Pairs file written to: {}", config.pairs_file.display());
    }
    Ok(())
}

fn run_inspect(location: &str, json: bool) -> Result<()> {
    let store = open_store(location)?;
    let (df, origin) = load_existing_or_empty(store.as_ref())?;

    let schema_ok = match &origin {
        DatasetOrigin::Loaded { .. } => true,
        DatasetOrigin::Missing => bail!("no dataset at {location}"),
        DatasetOrigin::SchemaReset { .. } => false,
    };
    let coverage = pair_coverage(&df)?;
    let duplicates = find_duplicate_keys(&df)?;

    if json {
        let pairs: serde_json::Map<String, serde_json::Value> = coverage
            .iter()
            .map(|(pair, c)| {
                (
                    pair.clone(),
                    serde_json::json!({
                        "rows": c.rows,
                        "first_tmsp": c.first_tmsp,
                        "last_tmsp": c.last_tmsp,
                    }),
                )
            })
            .collect();
        let report = serde_json::json!({
            "location": location,
            "schema_ok": schema_ok,
            "rows": df.height(),
            "pairs": pairs,
            "duplicate_keys": duplicates.len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Dataset: {location}");
    match &origin {
        DatasetOrigin::SchemaReset { found } => {
            println!("Schema:  MISMATCH, found columns {found:?}");
            return Ok(());
        }
        _ => println!("Schema:  ok"),
    }
    println!("Rows:    {}", df.height());
    println!("Pairs:   {}", coverage.len());
    println!();
    println!("{:<14} {:>8} {:>12} {:>12}", "Pair", "Rows", "First tmsp", "Last tmsp");
    println!("{}", "-".repeat(50));
    for (pair, c) in &coverage {
        println!(
            "{:<14} {:>8} {:>12} {:>12}",
            pair, c.rows, c.first_tmsp, c.last_tmsp
        );
    }

    if !duplicates.is_empty() {
        println!();
        println!("Duplicate keys ({}):", duplicates.len());
        for ((pair, tmsp), count) in duplicates.iter().take(20) {
            println!("  {pair} @ {tmsp} x{count}");
        }
    }
    Ok(())
}
