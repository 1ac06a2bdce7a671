//! Merge engine: append each pair's new rows to the dataset.
//!
//! Plain concatenation in pair order. There is no deduplication pass; uniqueness
//! of (asset_pair, tmsp) rests on the fetcher's resumption point.

use super::fetch::PairBatch;
use super::table::TableError;
use polars::prelude::DataFrame;

/// Append `new_rows` to `acc`. An empty batch leaves `acc` untouched.
pub fn merge_step(mut acc: DataFrame, new_rows: &DataFrame) -> Result<DataFrame, TableError> {
    if new_rows.height() == 0 {
        return Ok(acc);
    }
    acc.vstack_mut(new_rows)?;
    Ok(acc)
}

/// Fold every batch onto `existing`, in iteration order.
///
/// Each `vstack_mut` adds chunks, so the result is rechunked once at the end.
pub fn merge<'a, I>(existing: DataFrame, batches: I) -> Result<DataFrame, TableError>
where
    I: IntoIterator<Item = &'a PairBatch>,
{
    let mut merged = batches
        .into_iter()
        .try_fold(existing, |acc, batch| merge_step(acc, &batch.frame))?;
    merged.as_single_chunk();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fetch::{records_to_frame, OhlcRecord};
    use crate::data::pairs::AssetPair;
    use crate::data::table::empty_frame;

    fn batch(id: &str, wsname: &str, tmsps: &[i64]) -> PairBatch {
        let pair = AssetPair::from_wsname(id, wsname).unwrap();
        let records: Vec<OhlcRecord> = tmsps
            .iter()
            .map(|t| OhlcRecord {
                tmsp: *t,
                open_price: 1.0,
                close_price: 2.0,
                volume: 3.0,
            })
            .collect();
        PairBatch {
            pair_id: id.to_string(),
            last_known: None,
            resume_from: 0,
            frame: records_to_frame(&pair, &records).unwrap(),
        }
    }

    fn column_i64(df: &DataFrame, name: &str) -> Vec<i64> {
        df.column(name)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn appends_in_pair_order() {
        let batches = vec![
            batch("XETHZEUR", "ETH/EUR", &[60, 120]),
            batch("XXBTZEUR", "XBT/EUR", &[60]),
        ];
        let merged = merge(empty_frame(), &batches).unwrap();

        assert_eq!(merged.height(), 3);
        assert_eq!(column_i64(&merged, "tmsp"), vec![60, 120, 60]);
        let pairs: Vec<&str> = merged
            .column("asset_pair")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(pairs, vec!["XETHZEUR", "XETHZEUR", "XXBTZEUR"]);
    }

    #[test]
    fn existing_rows_come_first() {
        let existing = batch("XXBTZEUR", "XBT/EUR", &[60]).frame;
        let merged = merge(existing, &[batch("XXBTZEUR", "XBT/EUR", &[120])]).unwrap();
        assert_eq!(column_i64(&merged, "tmsp"), vec![60, 120]);
    }

    #[test]
    fn no_batches_is_identity() {
        let existing = batch("XXBTZEUR", "XBT/EUR", &[60, 120]).frame;
        let merged = merge(existing.clone(), std::iter::empty()).unwrap();
        assert!(merged.equals(&existing));
    }

    #[test]
    fn empty_batches_are_skipped() {
        let merged = merge(empty_frame(), &[batch("XXBTZEUR", "XBT/EUR", &[])]).unwrap();
        assert_eq!(merged.height(), 0);
    }

    #[test]
    fn mismatched_columns_fail() {
        let other = polars::prelude::df!("foo" => &[1i64]).unwrap();
        assert!(merge_step(empty_frame(), &other).is_err());
    }

    #[test]
    fn merged_columns_are_contiguous() {
        let batches: Vec<PairBatch> = (0..8)
            .map(|i| batch(&format!("P{i}EUR"), &format!("P{i}/EUR"), &[60, 120]))
            .collect();
        let merged = merge(empty_frame(), &batches).unwrap();

        assert_eq!(merged.height(), 16);
        for column in merged.get_columns() {
            assert_eq!(column.as_materialized_series().n_chunks(), 1, "{}", column.name());
        }
    }
}
