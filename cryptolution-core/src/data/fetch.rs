//! Differential fetcher: resume each pair where the stored series stops.
//!
//! For a pair whose latest stored bucket is `T`, only buckets from
//! `T + period` onwards are requested. A pair with no rows yet is requested
//! from `0`, i.e. the full history the provider offers.

use super::pairs::AssetPair;
use super::provider::{MarketDataProvider, ProviderError};
use super::retry::RetryPolicy;
use super::table::{build_frame_from_schema_and_data, compute_max_for_given_filter, TableError};
use crate::schema::{column_names, RawOhlcField, COL_ASSET_PAIR, COL_TMSP, TIME_FORMAT};
use chrono::{DateTime, Local};
use polars::prelude::{DataFrame, NamedFrom, Series};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Query period between two consecutive buckets, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueryPeriod(i64);

impl QueryPeriod {
    pub fn from_interval_minutes(minutes: u32) -> Self {
        Self(i64::from(minutes) * 60)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn secs(self) -> i64 {
        self.0
    }

    /// The provider's `interval` parameter for this period.
    pub fn interval_minutes(self) -> u32 {
        u32::try_from(self.0 / 60).unwrap_or(u32::MAX)
    }
}

/// Errors that stop a pair from being fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Latest stored `tmsp` for `pair_id`, `None` when the pair has no rows.
pub fn last_known_timestamp(existing: &DataFrame, pair_id: &str) -> Result<Option<i64>, TableError> {
    let max = compute_max_for_given_filter(existing, COL_TMSP, COL_ASSET_PAIR, pair_id)?;
    Ok((!max.is_nan()).then_some(max as i64))
}

/// First timestamp to request: one period after the last known bucket, or `0`.
pub fn resume_from(last_known: Option<i64>, period: QueryPeriod) -> i64 {
    last_known.map_or(0, |t| t + period.secs())
}

/// One bucket of a pair, reduced to the stored fields.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcRecord {
    pub tmsp: i64,
    pub open_price: f64,
    pub close_price: f64,
    pub volume: f64,
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Map one raw provider tuple onto the stored fields by position.
pub fn parse_raw_row(pair_id: &str, row: &[Value]) -> Result<OhlcRecord, ProviderError> {
    if row.len() < RawOhlcField::min_width() {
        return Err(ProviderError::ResponseFormatChanged(format!(
            "{pair_id}: OHLC row has {} fields, expected at least {}",
            row.len(),
            RawOhlcField::min_width()
        )));
    }

    let bad = |field: RawOhlcField| {
        ProviderError::ResponseFormatChanged(format!(
            "{pair_id}: unparsable {field:?} value {}",
            row[field.position()]
        ))
    };
    let float = |field: RawOhlcField| value_as_f64(&row[field.position()]).ok_or_else(|| bad(field));

    let tmsp = value_as_i64(&row[RawOhlcField::Timestamp.position()])
        .filter(|t| DateTime::from_timestamp(*t, 0).is_some())
        .ok_or_else(|| bad(RawOhlcField::Timestamp))?;

    Ok(OhlcRecord {
        tmsp,
        open_price: float(RawOhlcField::Open)?,
        close_price: float(RawOhlcField::Close)?,
        volume: float(RawOhlcField::Volume)?,
    })
}

/// Render epoch seconds in the local time zone, `None` when out of range.
pub fn format_local_time(tmsp: i64) -> Option<String> {
    DateTime::from_timestamp(tmsp, 0)
        .map(|utc| utc.with_timezone(&Local).format(TIME_FORMAT).to_string())
}

/// Shape one pair's records into a table with the dataset schema.
pub fn records_to_frame(pair: &AssetPair, records: &[OhlcRecord]) -> Result<DataFrame, TableError> {
    let n = records.len();
    let repeat = |s: &str| vec![s.to_string(); n];
    let times = records
        .iter()
        .map(|r| {
            format_local_time(r.tmsp).ok_or(TableError::TimestampOutOfRange { tmsp: r.tmsp })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data = vec![
        Series::new("".into(), repeat(&pair.id)),
        Series::new("".into(), repeat(&pair.wsname)),
        Series::new("".into(), repeat(&pair.asset)),
        Series::new("".into(), repeat(&pair.currency)),
        Series::new("".into(), times),
        Series::new("".into(), records.iter().map(|r| r.tmsp).collect::<Vec<i64>>()),
        Series::new("".into(), records.iter().map(|r| r.open_price).collect::<Vec<f64>>()),
        Series::new("".into(), records.iter().map(|r| r.close_price).collect::<Vec<f64>>()),
        Series::new("".into(), records.iter().map(|r| r.volume).collect::<Vec<f64>>()),
    ];

    build_frame_from_schema_and_data(&column_names(), data)
}

/// New rows for one pair, plus the resumption bookkeeping that produced them.
#[derive(Debug, Clone)]
pub struct PairBatch {
    pub pair_id: String,
    pub last_known: Option<i64>,
    pub resume_from: i64,
    pub frame: DataFrame,
}

impl PairBatch {
    pub fn rows(&self) -> usize {
        self.frame.height()
    }
}

/// Fetches the missing suffix of each pair's series.
pub struct DifferentialFetcher<'a> {
    provider: &'a dyn MarketDataProvider,
    retry: RetryPolicy,
    period: QueryPeriod,
}

impl<'a> DifferentialFetcher<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider, retry: RetryPolicy, period: QueryPeriod) -> Self {
        Self {
            provider,
            retry,
            period,
        }
    }

    pub fn period(&self) -> QueryPeriod {
        self.period
    }

    /// Fetch the rows of `pair` newer than what `existing` already holds.
    ///
    /// Buckets at or before the last known timestamp are dropped, so the batch
    /// never repeats a stored key even if the provider echoes the boundary.
    pub fn fetch_pair(&self, existing: &DataFrame, pair: &AssetPair) -> Result<PairBatch, FetchError> {
        let last_known = last_known_timestamp(existing, &pair.id)?;
        let since = resume_from(last_known, self.period);
        let interval = self.period.interval_minutes();

        let series = self
            .retry
            .run(&format!("OHLC {}", pair.id), || self.provider.ohlc(&pair.id, interval, since))?;

        let mut records = series
            .rows
            .iter()
            .map(|row| parse_raw_row(&pair.id, row))
            .collect::<Result<Vec<_>, _>>()?;

        let received = records.len();
        if let Some(last) = last_known {
            records.retain(|r| r.tmsp > last);
        }
        debug!(
            pair = %pair.id,
            since,
            received,
            kept = records.len(),
            "OHLC batch"
        );

        Ok(PairBatch {
            pair_id: pair.id.clone(),
            last_known,
            resume_from: since,
            frame: records_to_frame(pair, &records)?,
        })
    }
}
