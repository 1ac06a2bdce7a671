//! Data layer: provider access, pair directory, differential fetch, merge and
//! storage of the OHLC dataset.

pub mod fetch;
pub mod ingest;
pub mod kraken;
pub mod merge;
pub mod pairs;
pub mod provider;
pub mod retry;
pub mod store;
pub mod table;
pub mod validate;

pub use fetch::{DifferentialFetcher, FetchError, OhlcRecord, PairBatch, QueryPeriod};
pub use ingest::{
    run_ingest, DatasetOrigin, IngestError, IngestOptions, IngestProgress, IngestSummary,
    PairOutcome, SilentProgress, TracingProgress,
};
pub use kraken::{Credentials, KrakenProvider};
pub use merge::{merge, merge_step};
pub use pairs::{clean_asset_pairs, AssetNames, AssetPair, PairDirectory};
pub use provider::{MarketDataProvider, OhlcSeries, ProviderError, RawAssetPair};
pub use retry::RetryPolicy;
pub use store::{open_store, DatasetStore, HttpCsvStore, LocalCsvStore, StoreError};
pub use table::TableError;
pub use validate::{check_schema, UnexpectedSchemaError};
