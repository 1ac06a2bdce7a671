//! Cryptolution Core: differential OHLC ingestion for Kraken asset pairs.
//!
//! This crate holds everything but the command line:
//! - Dataset schema (column names, order, dtypes, raw tuple layout)
//! - Asset pair directory built from the provider listing
//! - Differential fetcher resuming each pair after its last stored bucket
//! - Merge of per-pair batches and CSV persistence, local or over HTTP
//! - Run orchestration and TOML configuration

pub mod config;
pub mod data;
pub mod schema;
