//! Ingestion run: load, fetch per pair, merge, write.
//!
//! One run is a sequential batch job. The stored dataset is loaded (or replaced
//! by an empty one when missing or malformed), the pair directory is rebuilt
//! from the provider, each pair's missing suffix is fetched, the batches are
//! appended, and the result overwrites the stored file. Nothing is written
//! unless every pair was either fetched or skipped as rejected.

use super::fetch::{DifferentialFetcher, FetchError, PairBatch, QueryPeriod};
use super::merge::merge;
use super::pairs::{clean_asset_pairs, write_pairs_file, PairDirectory, PairsFileError};
use super::provider::{MarketDataProvider, ProviderError};
use super::retry::RetryPolicy;
use super::store::{DatasetStore, StoreError};
use super::table::{conform_to_schema, empty_frame, TableError};
use super::validate::{check_frame_schema, find_duplicate_keys};
use crate::schema::{COL_ASSET_PAIR, COL_CLOSE_PRICE, COL_OPEN_PRICE, COL_TMSP, COL_VOLUME};
use polars::prelude::DataFrame;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that abort a run. Nothing is written when one is returned.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    PairsFile(#[from] PairsFileError),
}

impl From<FetchError> for IngestError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Provider(e) => IngestError::Provider(e),
            FetchError::Table(e) => IngestError::Table(e),
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub interval_minutes: u32,
    pub keep_common_currencies: bool,
    pub currencies: Vec<String>,
    pub max_pairs: Option<usize>,
    /// Where to write the cleaned pair directory, if at all.
    pub pairs_file: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            interval_minutes: 1440,
            keep_common_currencies: true,
            currencies: super::pairs::default_currencies(),
            max_pairs: Some(400),
            pairs_file: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// How the stored dataset looked at the start of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOrigin {
    Loaded { rows: usize },
    /// Nothing usable at the location (missing or not a CSV path).
    Missing,
    /// A file was there but its header did not match; it will be overwritten.
    SchemaReset { found: Vec<String> },
}

/// What happened to one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    Appended { rows: usize, resume_from: i64 },
    UpToDate { resume_from: i64 },
    Rejected { reason: String },
}

/// Progress callbacks for a run.
pub trait IngestProgress {
    fn on_start(&self, pair: &str, index: usize, total: usize);

    fn on_complete(&self, pair: &str, index: usize, total: usize, outcome: &PairOutcome);

    fn on_run_complete(&self, summary: &IngestSummary);
}

/// Reports progress through `tracing`.
pub struct TracingProgress;

impl IngestProgress for TracingProgress {
    fn on_start(&self, pair: &str, index: usize, total: usize) {
        info!("[{}/{}] fetching {pair}", index + 1, total);
    }

    fn on_complete(&self, pair: &str, _index: usize, _total: usize, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Appended { rows, resume_from } => {
                info!(pair, rows, resume_from, "appended")
            }
            PairOutcome::UpToDate { resume_from } => info!(pair, resume_from, "up to date"),
            PairOutcome::Rejected { reason } => warn!(pair, %reason, "skipped"),
        }
    }

    fn on_run_complete(&self, summary: &IngestSummary) {
        info!(
            pairs = summary.pairs_total,
            appended = summary.rows_appended,
            rows = summary.rows_total,
            rejected = summary.rejected().len(),
            elapsed_ms = summary.elapsed_ms,
            hash = %summary.dataset_hash,
            "ingestion complete"
        );
    }
}

/// Reports nothing.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &PairOutcome) {}
    fn on_run_complete(&self, _: &IngestSummary) {}
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub location: String,
    pub origin: DatasetOrigin,
    pub pairs_total: usize,
    pub outcomes: Vec<(String, PairOutcome)>,
    pub rows_before: usize,
    pub rows_appended: usize,
    pub rows_total: usize,
    pub duplicate_keys: usize,
    pub dataset_hash: String,
    pub elapsed_ms: u64,
}

impl IngestSummary {
    pub fn rejected(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PairOutcome::Rejected { .. }))
            .map(|(p, _)| p.as_str())
            .collect()
    }
}

/// Load the stored dataset, falling back to an empty one when it is missing or
/// its header does not match the schema. Other read failures abort the run, as
/// does a matching header over cells that do not parse as their column dtype.
pub fn load_existing_or_empty(
    store: &dyn DatasetStore,
) -> Result<(DataFrame, DatasetOrigin), IngestError> {
    let df = match store.read() {
        Ok(df) => df,
        Err(e) if e.is_recoverable_on_read() => {
            warn!(path = store.location(), error = %e, "no usable dataset, starting empty");
            return Ok((empty_frame(), DatasetOrigin::Missing));
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = check_frame_schema(&df) {
        error!(path = store.location(), error = %e, "stored dataset rejected, starting empty");
        return Ok((empty_frame(), DatasetOrigin::SchemaReset { found: e.found }));
    }

    let conformed = conform_to_schema(&df).inspect_err(|e| {
        error!(path = store.location(), error = %e, "stored dataset has unparsable values");
    })?;
    let rows = conformed.height();
    info!(path = store.location(), rows, "dataset loaded");
    Ok((conformed, DatasetOrigin::Loaded { rows }))
}

/// Fetch the provider's listing and clean it into this run's directory.
pub fn build_directory(
    provider: &dyn MarketDataProvider,
    options: &IngestOptions,
) -> Result<PairDirectory, ProviderError> {
    let raw = options
        .retry
        .run("AssetPairs", || provider.asset_pairs())?;
    let mut directory =
        clean_asset_pairs(&raw, options.keep_common_currencies, &options.currencies);
    if let Some(max) = options.max_pairs {
        directory.truncate(max);
    }
    info!(
        provider = provider.name(),
        listed = raw.len(),
        kept = directory.len(),
        "pair directory built"
    );
    Ok(directory)
}

/// Deterministic BLAKE3 digest over every row's key and values.
pub fn compute_dataset_hash(df: &DataFrame) -> Result<String, TableError> {
    let pairs = df.column(COL_ASSET_PAIR)?.str()?;
    let tmsps = df.column(COL_TMSP)?.i64()?;
    let opens = df.column(COL_OPEN_PRICE)?.f64()?;
    let closes = df.column(COL_CLOSE_PRICE)?.f64()?;
    let volumes = df.column(COL_VOLUME)?.f64()?;

    let mut hasher = blake3::Hasher::new();
    for i in 0..df.height() {
        hasher.update(pairs.get(i).unwrap_or_default().as_bytes());
        hasher.update(&tmsps.get(i).unwrap_or_default().to_le_bytes());
        hasher.update(&opens.get(i).unwrap_or(f64::NAN).to_le_bytes());
        hasher.update(&closes.get(i).unwrap_or(f64::NAN).to_le_bytes());
        hasher.update(&volumes.get(i).unwrap_or(f64::NAN).to_le_bytes());
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Run one ingestion against `store`.
pub fn run_ingest(
    provider: &dyn MarketDataProvider,
    store: &dyn DatasetStore,
    options: &IngestOptions,
    progress: &dyn IngestProgress,
) -> Result<IngestSummary, IngestError> {
    let started = Instant::now();

    let (existing, origin) = load_existing_or_empty(store)?;
    let rows_before = existing.height();

    let directory = build_directory(provider, options)?;

    let fetcher = DifferentialFetcher::new(
        provider,
        options.retry,
        QueryPeriod::from_interval_minutes(options.interval_minutes),
    );

    let total = directory.len();
    let mut batches: Vec<PairBatch> = Vec::with_capacity(total);
    let mut outcomes = Vec::with_capacity(total);

    for (i, pair) in directory.iter().enumerate() {
        progress.on_start(&pair.id, i, total);

        let outcome = match fetcher.fetch_pair(&existing, pair) {
            Ok(batch) => {
                let outcome = if batch.rows() == 0 {
                    PairOutcome::UpToDate {
                        resume_from: batch.resume_from,
                    }
                } else {
                    PairOutcome::Appended {
                        rows: batch.rows(),
                        resume_from: batch.resume_from,
                    }
                };
                batches.push(batch);
                outcome
            }
            Err(FetchError::Provider(ProviderError::PairRejected { reason, .. })) => {
                PairOutcome::Rejected { reason }
            }
            Err(e) => return Err(e.into()),
        };

        progress.on_complete(&pair.id, i, total, &outcome);
        outcomes.push((pair.id.clone(), outcome));
    }

    let mut merged = merge(existing, &batches)?;

    let duplicates = find_duplicate_keys(&merged)?;
    if !duplicates.is_empty() {
        warn!(
            count = duplicates.len(),
            first = ?duplicates.first().map(|(k, _)| k),
            "duplicate (asset_pair, tmsp) keys in merged dataset"
        );
    }

    let dataset_hash = compute_dataset_hash(&merged)?;
    store.write(&mut merged)?;

    if let Some(path) = &options.pairs_file {
        write_pairs_file(path, &directory)?;
        info!(path = %path.display(), pairs = directory.len(), "pairs file written");
    }

    let rows_total = merged.height();
    let summary = IngestSummary {
        location: store.location().to_string(),
        origin,
        pairs_total: total,
        outcomes,
        rows_before,
        rows_appended: rows_total - rows_before,
        rows_total,
        duplicate_keys: duplicates.len(),
        dataset_hash,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    progress.on_run_complete(&summary);
    Ok(summary)
}
