//! Polars helpers shared by the fetcher, the merge engine and the store.

use crate::schema::{polars_schema, OHLC_SCHEMA};
use polars::prelude::*;
use thiserror::Error;

/// Errors raised while building or querying in-memory tables.
///
/// The first two variants are invariant violations: they mean rows would be
/// built or looked up inconsistently, so the caller must not continue.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("data does not fit schema {schema:?}: column count or column lengths differ")]
    NotConsistentDataForDataframe { schema: Vec<String> },

    #[error("cannot access fields {field_candidates:?}: not present in table")]
    AccessDataframeFieldFailure { field_candidates: Vec<String> },

    #[error("timestamp {tmsp} is outside the representable date range")]
    TimestampOutOfRange { tmsp: i64 },

    #[error("column {column} holds values that are not {dtype}")]
    UnparsableStoredValues { column: String, dtype: String },

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// An empty table carrying the dataset schema.
pub fn empty_frame() -> DataFrame {
    DataFrame::empty_with_schema(&polars_schema())
}

/// Build a table from per-field arrays, naming them after `schema`.
///
/// `data[i]` becomes the column `schema[i]`. Fails with
/// `NotConsistentDataForDataframe` when there are not exactly as many arrays as
/// schema names, or when the arrays do not all have the same length.
pub fn build_frame_from_schema_and_data(
    schema: &[&str],
    data: Vec<Series>,
) -> Result<DataFrame, TableError> {
    let inconsistent = || TableError::NotConsistentDataForDataframe {
        schema: schema.iter().map(|s| s.to_string()).collect(),
    };

    if schema.len() != data.len() {
        return Err(inconsistent());
    }
    let height = data.first().map(|s| s.len()).ok_or_else(inconsistent)?;
    if data.iter().any(|s| s.len() != height) {
        return Err(inconsistent());
    }

    let columns: Vec<Column> = schema
        .iter()
        .zip(data)
        .map(|(name, series)| Column::from(series.with_name((*name).into())))
        .collect();

    Ok(DataFrame::new(columns)?)
}

/// Max of `maxed_field` over the rows where `filter_field == filter_value`.
///
/// Returns `NaN` when no row matches. Fails with `AccessDataframeFieldFailure`
/// if either field is missing from the table.
pub fn compute_max_for_given_filter<L: Literal>(
    df: &DataFrame,
    maxed_field: &str,
    filter_field: &str,
    filter_value: L,
) -> Result<f64, TableError> {
    if df.column(maxed_field).is_err() || df.column(filter_field).is_err() {
        return Err(TableError::AccessDataframeFieldFailure {
            field_candidates: vec![maxed_field.to_string(), filter_field.to_string()],
        });
    }

    let out = df
        .clone()
        .lazy()
        .filter(col(filter_field).eq(lit(filter_value)))
        .select([col(maxed_field).cast(DataType::Float64).max()])
        .collect()?;

    let max = out.column(maxed_field)?.f64()?.get(0);
    Ok(max.unwrap_or(f64::NAN))
}

/// Reorder and cast a table to the dataset schema.
///
/// The caller is expected to have run the column-name check already; this only
/// fixes dtypes (a header-only CSV is read back as all-string columns). A cell
/// that does not parse as its column's dtype fails with `UnparsableStoredValues`
/// instead of turning into a null.
pub fn conform_to_schema(df: &DataFrame) -> Result<DataFrame, TableError> {
    let mut columns = Vec::with_capacity(OHLC_SCHEMA.len());
    for field in OHLC_SCHEMA {
        let column = df
            .column(field.name)
            .map_err(|_| TableError::AccessDataframeFieldFailure {
                field_candidates: vec![field.name.to_string()],
            })?;
        let dtype = field.dtype.dtype();
        let cast = column
            .strict_cast(&dtype)
            .map_err(|_| TableError::UnparsableStoredValues {
                column: field.name.to_string(),
                dtype: dtype.to_string(),
            })?;
        columns.push(cast);
    }
    Ok(DataFrame::new(columns)?)
}
