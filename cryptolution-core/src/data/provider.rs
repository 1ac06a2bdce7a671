//! Market data provider trait and structured error types.
//!
//! The `MarketDataProvider` trait abstracts over the remote API so the
//! differential fetcher can be driven by a mock in tests. Retrying is not the
//! provider's job: callers wrap calls in a `RetryPolicy`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw pair metadata as listed by the provider. Only `wsname` is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAssetPair {
    /// Display pair name, `BASE/QUOTE` (e.g. `XBT/EUR`).
    #[serde(default)]
    pub wsname: Option<String>,
}

impl RawAssetPair {
    pub fn new(wsname: impl Into<String>) -> Self {
        Self {
            wsname: Some(wsname.into()),
        }
    }
}

/// One OHLC answer for a single pair.
#[derive(Debug, Clone)]
pub struct OhlcSeries {
    pub pair: String,
    /// Fixed-width tuples: `[time, open, high, low, close, vwap, volume, count]`.
    pub rows: Vec<Vec<Value>>,
    /// Provider cursor for the next `since`, when reported.
    pub last: Option<i64>,
}

/// Structured errors for provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure, non-success status or undecodable body. Retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered with an error for this pair (unknown, delisted, ...).
    #[error("provider rejected pair {pair}: {reason}")]
    PairRejected { pair: String, reason: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("gave up on {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::ProviderUnavailable(_))
    }
}

/// Source of asset pairs and OHLC series.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// List every tradable pair, keyed by provider pair identifier.
    fn asset_pairs(&self) -> Result<BTreeMap<String, RawAssetPair>, ProviderError>;

    /// OHLC buckets for `pair` at `interval_minutes` granularity, starting at
    /// `since` (epoch seconds, `0` for the full history the provider offers).
    fn ohlc(&self, pair: &str, interval_minutes: u32, since: i64)
        -> Result<OhlcSeries, ProviderError>;
}
