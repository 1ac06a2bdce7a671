//! Dataset schema contract: the boundary between the ingestion core and the
//! stored CSV consumed by the dashboard.
//!
//! Defines the exact column names, their order and their data types, plus the
//! positional layout of the raw OHLC tuples returned by the provider.

use polars::prelude::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};

/// Expected data types in the dataset schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    Utf8,
    Int64,
    Float64,
}

impl SchemaType {
    /// The polars dtype used for this column in memory.
    pub fn dtype(self) -> DataType {
        match self {
            SchemaType::Utf8 => DataType::String,
            SchemaType::Int64 => DataType::Int64,
            SchemaType::Float64 => DataType::Float64,
        }
    }
}

/// A single field in the expected dataset schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
}

pub const COL_ASSET_PAIR: &str = "asset_pair";
pub const COL_WSNAME: &str = "wsname";
pub const COL_ASSET: &str = "asset";
pub const COL_CURRENCY: &str = "currency";
pub const COL_TIME: &str = "time";
pub const COL_TMSP: &str = "tmsp";
pub const COL_OPEN_PRICE: &str = "open_price";
pub const COL_CLOSE_PRICE: &str = "close_price";
pub const COL_VOLUME: &str = "volume";

/// The canonical dataset schema.
///
/// - One flat table for every asset pair, keyed by (`asset_pair`, `tmsp`)
/// - `tmsp`: raw epoch seconds as returned by the provider
/// - `time`: `tmsp` rendered as `%Y-%m-%d %H:%M:%S` in the local time zone
/// - Column order is part of the contract: the CSV header must match exactly
pub const OHLC_SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: COL_ASSET_PAIR,
        dtype: SchemaType::Utf8,
    },
    SchemaField {
        name: COL_WSNAME,
        dtype: SchemaType::Utf8,
    },
    SchemaField {
        name: COL_ASSET,
        dtype: SchemaType::Utf8,
    },
    SchemaField {
        name: COL_CURRENCY,
        dtype: SchemaType::Utf8,
    },
    SchemaField {
        name: COL_TIME,
        dtype: SchemaType::Utf8,
    },
    SchemaField {
        name: COL_TMSP,
        dtype: SchemaType::Int64,
    },
    SchemaField {
        name: COL_OPEN_PRICE,
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: COL_CLOSE_PRICE,
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: COL_VOLUME,
        dtype: SchemaType::Float64,
    },
];

/// Format used for the human-readable `time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered column names of the dataset schema.
pub fn column_names() -> Vec<&'static str> {
    OHLC_SCHEMA.iter().map(|f| f.name).collect()
}

/// The dataset schema as a polars `Schema`, in column order.
pub fn polars_schema() -> Schema {
    Schema::from_iter(
        OHLC_SCHEMA
            .iter()
            .map(|f| Field::new(f.name.into(), f.dtype.dtype())),
    )
}

/// Positions of the fields we keep inside one raw provider OHLC tuple.
///
/// The provider returns `[time, open, high, low, close, vwap, volume, count]`.
/// High, low, vwap and trade count (positions 2, 3, 5, 7) are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOhlcField {
    Timestamp = 0,
    Open = 1,
    Close = 4,
    Volume = 6,
}

impl RawOhlcField {
    /// Index of this field inside the raw tuple.
    pub fn position(self) -> usize {
        self as usize
    }

    /// Minimum tuple width needed to read every kept field.
    pub fn min_width() -> usize {
        RawOhlcField::Volume.position() + 1
    }
}
