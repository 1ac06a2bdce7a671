//! Integrity checks on the stored dataset.
//!
//! `check_schema` guards the load path: a stored table whose header differs
//! from the schema in any way (names, order, count) is rejected and the run
//! starts from an empty dataset instead.

use super::table::TableError;
use crate::schema::{column_names, COL_ASSET_PAIR, COL_TMSP};
use polars::prelude::DataFrame;
use std::collections::BTreeMap;
use thiserror::Error;

/// The stored dataset's columns do not match the expected schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected schema: expected columns {expected_schema:?}, found {found:?}")]
pub struct UnexpectedSchemaError {
    pub expected_schema: Vec<String>,
    pub found: Vec<String>,
}

/// Check that `existing_columns` is exactly `expected_schema`, order included.
pub fn check_schema(
    existing_columns: &[&str],
    expected_schema: &[&str],
) -> Result<(), UnexpectedSchemaError> {
    if existing_columns == expected_schema {
        return Ok(());
    }
    Err(UnexpectedSchemaError {
        expected_schema: expected_schema.iter().map(|s| s.to_string()).collect(),
        found: existing_columns.iter().map(|s| s.to_string()).collect(),
    })
}

/// Check a table's header against the dataset schema.
pub fn check_frame_schema(df: &DataFrame) -> Result<(), UnexpectedSchemaError> {
    let found: Vec<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
    check_schema(&found, &column_names())
}

/// Every (asset_pair, tmsp) key that occurs more than once, with its count.
///
/// A non-empty result means the resumption point was computed wrong at some
/// point; nothing in the pipeline removes duplicates.
pub fn find_duplicate_keys(df: &DataFrame) -> Result<Vec<((String, i64), usize)>, TableError> {
    let field_failure = || TableError::AccessDataframeFieldFailure {
        field_candidates: vec![COL_ASSET_PAIR.to_string(), COL_TMSP.to_string()],
    };
    let pairs = df.column(COL_ASSET_PAIR).map_err(|_| field_failure())?;
    let tmsps = df.column(COL_TMSP).map_err(|_| field_failure())?;
    let pairs = pairs.str()?;
    let tmsps = tmsps.i64()?;

    let mut counts: BTreeMap<(String, i64), usize> = BTreeMap::new();
    for (pair, tmsp) in pairs.into_iter().zip(tmsps.into_iter()) {
        if let (Some(pair), Some(tmsp)) = (pair, tmsp) {
            *counts.entry((pair.to_string(), tmsp)).or_default() += 1;
        }
    }

    Ok(counts.into_iter().filter(|(_, n)| *n > 1).collect())
}

/// Row count and latest `tmsp` of one pair in the stored dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCoverage {
    pub rows: usize,
    pub first_tmsp: i64,
    pub last_tmsp: i64,
}

/// Per-pair coverage, in pair order.
pub fn pair_coverage(df: &DataFrame) -> Result<BTreeMap<String, PairCoverage>, TableError> {
    let field_failure = || TableError::AccessDataframeFieldFailure {
        field_candidates: vec![COL_ASSET_PAIR.to_string(), COL_TMSP.to_string()],
    };
    let pairs = df.column(COL_ASSET_PAIR).map_err(|_| field_failure())?.str()?;
    let tmsps = df.column(COL_TMSP).map_err(|_| field_failure())?.i64()?;

    let mut coverage: BTreeMap<String, PairCoverage> = BTreeMap::new();
    for (pair, tmsp) in pairs.into_iter().zip(tmsps.into_iter()) {
        let (Some(pair), Some(tmsp)) = (pair, tmsp) else {
            continue;
        };
        coverage
            .entry(pair.to_string())
            .and_modify(|c| {
                c.rows += 1;
                c.first_tmsp = c.first_tmsp.min(tmsp);
                c.last_tmsp = c.last_tmsp.max(tmsp);
            })
            .or_insert(PairCoverage {
                rows: 1,
                first_tmsp: tmsp,
                last_tmsp: tmsp,
            });
    }
    Ok(coverage)
}
