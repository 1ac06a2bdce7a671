//! End-to-end ingestion runs against a deterministic in-memory provider.
//!
//! The mock serves daily buckets from a fixed origin up to a movable "now", so
//! successive runs behave like successive days of the batch job.

use cryptolution_core::data::ingest::{load_existing_or_empty, SilentProgress};
use cryptolution_core::data::validate::{find_duplicate_keys, pair_coverage};
use cryptolution_core::data::{
    run_ingest, DatasetOrigin, DatasetStore, IngestError, IngestOptions, LocalCsvStore,
    MarketDataProvider, OhlcSeries, PairOutcome, ProviderError, RawAssetPair, RetryPolicy,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

const DAY: i64 = 86_400;
const ORIGIN: i64 = 1_672_531_200;

struct MockKraken {
    now: AtomicI64,
    /// Also return the bucket right before `since`, as the real API sometimes does.
    echo_boundary: bool,
    /// Fail this many OHLC calls with a transient error before answering.
    transient_failures: AtomicU32,
}

impl MockKraken {
    fn new(days: i64) -> Self {
        Self {
            now: AtomicI64::new(ORIGIN + days * DAY),
            echo_boundary: false,
            transient_failures: AtomicU32::new(0),
        }
    }

    fn advance(&self, days: i64) {
        self.now.fetch_add(days * DAY, Ordering::SeqCst);
    }

    fn row(pair: &str, t: i64) -> Vec<Value> {
        let base = pair.len() as f64 + ((t - ORIGIN) / DAY) as f64;
        vec![
            json!(t),
            json!(format!("{:.4}", base)),
            json!(format!("{:.4}", base + 1.0)),
            json!(format!("{:.4}", base - 1.0)),
            json!(format!("{:.4}", base + 0.5)),
            json!(format!("{:.4}", base + 0.25)),
            json!(format!("{:.8}", base * 100.0)),
            json!(42),
        ]
    }
}

impl MarketDataProvider for MockKraken {
    fn name(&self) -> &str {
        "mock-kraken"
    }

    fn asset_pairs(&self) -> Result<BTreeMap<String, RawAssetPair>, ProviderError> {
        Ok([
            ("XXBTZEUR", "XBT/EUR"),
            ("XXBTZUSD", "XBT/USD"),
            ("XETHZEUR", "ETH/EUR"),
            ("XXRPXXBT", "XRP/XBT"),
            ("GONEEUR", "GONE/EUR"),
        ]
        .into_iter()
        .map(|(id, ws)| (id.to_string(), RawAssetPair::new(ws)))
        .collect())
    }

    fn ohlc(&self, pair: &str, interval: u32, since: i64) -> Result<OhlcSeries, ProviderError> {
        assert_eq!(interval, 1440);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::ProviderUnavailable("EService:Busy".into()));
        }
        if pair == "GONEEUR" {
            return Err(ProviderError::PairRejected {
                pair: pair.into(),
                reason: "EQuery:Unknown asset pair".into(),
            });
        }

        let now = self.now.load(Ordering::SeqCst);
        let start = if self.echo_boundary && since > 0 {
            since - DAY
        } else {
            since
        };
        let rows: Vec<Vec<Value>> = (0..)
            .map(|i| ORIGIN + i * DAY)
            .take_while(|t| *t <= now)
            .filter(|t| *t >= start)
            .map(|t| Self::row(pair, t))
            .collect();
        let last = rows.last().and_then(|r| r[0].as_i64());
        Ok(OhlcSeries {
            pair: pair.into(),
            rows,
            last,
        })
    }
}

fn options() -> IngestOptions {
    IngestOptions {
        retry: RetryPolicy::new(5, Duration::ZERO),
        ..IngestOptions::default()
    }
}

fn tmsps_of(store: &dyn DatasetStore, pair: &str) -> Vec<i64> {
    let (df, _) = load_existing_or_empty(store).unwrap();
    let pairs = df.column("asset_pair").unwrap().str().unwrap();
    let tmsps = df.column("tmsp").unwrap().i64().unwrap();
    pairs
        .into_iter()
        .zip(tmsps.into_iter())
        .filter(|(p, _)| *p == Some(pair))
        .filter_map(|(_, t)| t)
        .collect()
}

#[test]
fn repeated_runs_append_without_duplicates() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    let provider = MockKraken::new(9);

    let first = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    // XXBTZEUR, XXBTZUSD, XETHZEUR with 10 buckets each; GONEEUR skipped.
    assert_eq!(first.rows_total, 30);
    assert_eq!(first.rejected(), vec!["GONEEUR"]);

    provider.advance(3);
    let second = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    assert_eq!(second.origin, DatasetOrigin::Loaded { rows: 30 });
    assert_eq!(second.rows_appended, 9);
    assert!(second.outcomes.contains(&(
        "XXBTZEUR".to_string(),
        PairOutcome::Appended {
            rows: 3,
            resume_from: ORIGIN + 10 * DAY,
        }
    )));

    let (df, _) = load_existing_or_empty(&store).unwrap();
    assert!(find_duplicate_keys(&df).unwrap().is_empty());
    assert_eq!(df.height(), 39);
}

#[test]
fn consecutive_buckets_are_one_period_apart() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    let provider = MockKraken::new(4);

    for _ in 0..4 {
        run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
        provider.advance(2);
    }

    let tmsps = tmsps_of(&store, "XETHZEUR");
    assert_eq!(tmsps.len(), 11);
    assert_eq!(tmsps[0], ORIGIN);
    for w in tmsps.windows(2) {
        assert_eq!(w[1] - w[0], DAY);
    }
}

#[test]
fn unchanged_provider_leaves_dataset_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    let provider = MockKraken::new(5);

    let first = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    let second = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();

    assert_eq!(second.rows_appended, 0);
    assert_eq!(first.dataset_hash, second.dataset_hash);
    assert!(second
        .outcomes
        .iter()
        .all(|(_, o)| !matches!(o, PairOutcome::Appended { .. })));
}

#[test]
fn echoed_boundary_bucket_is_not_duplicated() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    let mut provider = MockKraken::new(3);
    provider.echo_boundary = true;

    run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    provider.advance(2);
    let summary = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();

    assert_eq!(summary.duplicate_keys, 0);
    assert_eq!(tmsps_of(&store, "XXBTZUSD").len(), 6);
}

#[test]
fn mismatched_stored_file_is_replaced() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.csv");
    std::fs::write(&path, "pair,close\nXXBTZEUR,1.0\n").unwrap();
    let store = LocalCsvStore::new(&path);

    let summary = run_ingest(&MockKraken::new(1), &store, &options(), &SilentProgress).unwrap();

    assert!(matches!(summary.origin, DatasetOrigin::SchemaReset { .. }));
    assert_eq!(summary.rows_total, 6);
    let (_, origin) = load_existing_or_empty(&store).unwrap();
    assert_eq!(origin, DatasetOrigin::Loaded { rows: 6 });
}

#[test]
fn transient_failures_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    let provider = MockKraken::new(2);
    provider.transient_failures.store(3, Ordering::SeqCst);

    let summary = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    assert_eq!(summary.rows_total, 9);
}

#[test]
fn exhausted_retries_abort_before_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.csv");
    let store = LocalCsvStore::new(&path);
    let provider = MockKraken::new(2);
    run_ingest(&provider, &store, &options(), &SilentProgress).unwrap();
    let before = std::fs::read(&path).unwrap();

    provider.advance(1);
    provider.transient_failures.store(100, Ordering::SeqCst);
    let err = run_ingest(&provider, &store, &options(), &SilentProgress).unwrap_err();

    assert!(matches!(
        err,
        IngestError::Provider(ProviderError::RetriesExhausted { attempts: 5, .. })
    ));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn coverage_reflects_every_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LocalCsvStore::new(tmp.path().join("data.csv"));
    run_ingest(&MockKraken::new(6), &store, &options(), &SilentProgress).unwrap();

    let (df, _) = load_existing_or_empty(&store).unwrap();
    let coverage = pair_coverage(&df).unwrap();
    assert_eq!(
        coverage.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
        vec!["XETHZEUR", "XXBTZEUR", "XXBTZUSD"]
    );
    for c in coverage.values() {
        assert_eq!(c.rows, 7);
        assert_eq!(c.first_tmsp, ORIGIN);
        assert_eq!(c.last_tmsp, ORIGIN + 6 * DAY);
    }
}
