//! Persistence adapter for the merged dataset.
//!
//! The dataset is one CSV file, either on local disk or behind an HTTP(S)
//! object-storage URL. Every write replaces the whole file.
//!
//! Local writes are atomic: the table is written to a `.csv.tmp` sibling and
//! renamed into place, so a crash mid-write leaves the previous file intact.

use polars::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while reading or writing the stored dataset.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file type not handled: {path} (only .csv is supported)")]
    FileTypeNotHandled { path: String },

    #[error("no existing file at {path}")]
    NoExistingFile { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: PolarsError,
    },

    #[error("HTTP error on {path}: {reason}")]
    Http { path: String, reason: String },

    #[error("unsupported storage scheme {scheme}:// in {path} (use a local path or http(s))")]
    UnsupportedScheme { path: String, scheme: String },
}

impl StoreError {
    /// Read failures after which the run starts from an empty dataset.
    pub fn is_recoverable_on_read(&self) -> bool {
        matches!(
            self,
            StoreError::NoExistingFile { .. } | StoreError::FileTypeNotHandled { .. }
        )
    }
}

/// Where the dataset lives.
pub trait DatasetStore {
    /// Path or URL, for logs.
    fn location(&self) -> &str;

    /// Load the stored table as written, with no dtype coercion.
    fn read(&self) -> Result<DataFrame, StoreError>;

    /// Replace the stored table with `df`.
    fn write(&self, df: &mut DataFrame) -> Result<(), StoreError>;
}

/// Pick the store implementation from the location's scheme.
///
/// `http://` and `https://` go to [`HttpCsvStore`], scheme-less locations to
/// [`LocalCsvStore`]. Any other `<scheme>://` fails with `UnsupportedScheme`.
pub fn open_store(location: &str) -> Result<Box<dyn DatasetStore>, StoreError> {
    match location.split_once("://") {
        Some(("http" | "https", _)) => Ok(Box::new(HttpCsvStore::new(location)?)),
        Some((scheme, _)) => Err(StoreError::UnsupportedScheme {
            path: location.to_string(),
            scheme: scheme.to_string(),
        }),
        None => Ok(Box::new(LocalCsvStore::new(location))),
    }
}

fn ensure_csv(location: &str) -> Result<(), StoreError> {
    if location.contains(".csv") {
        Ok(())
    } else {
        Err(StoreError::FileTypeNotHandled {
            path: location.to_string(),
        })
    }
}

/// Parse CSV bytes with every column read as text.
///
/// A blank file yields a table with no columns at all, which the schema check
/// then rejects.
fn parse_csv(location: &str, bytes: Vec<u8>) -> Result<DataFrame, StoreError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(DataFrame::empty());
    }
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|source| StoreError::Csv {
            path: location.to_string(),
            source,
        })
}

fn render_csv(location: &str, df: &mut DataFrame) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(df)
        .map_err(|source| StoreError::Csv {
            path: location.to_string(),
            source,
        })?;
    Ok(buf)
}

// ── Local disk ───────────────────────────────────────────────────────

/// CSV file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalCsvStore {
    location: String,
    path: PathBuf,
}

impl LocalCsvStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            location: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.location.clone(),
            source,
        }
    }
}

impl DatasetStore for LocalCsvStore {
    fn location(&self) -> &str {
        &self.location
    }

    fn read(&self) -> Result<DataFrame, StoreError> {
        ensure_csv(&self.location)?;
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NoExistingFile {
                    path: self.location.clone(),
                })
            }
            Err(e) => return Err(self.io_error(e)),
        };
        debug!(path = %self.location, bytes = bytes.len(), "dataset read");
        parse_csv(&self.location, bytes)
    }

    fn write(&self, df: &mut DataFrame) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let buf = render_csv(&self.location, df)?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, &buf).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.io_error(e)
        })?;

        debug!(path = %self.location, rows = df.height(), bytes = buf.len(), "dataset written");
        Ok(())
    }
}

// ── HTTP object storage ──────────────────────────────────────────────

/// CSV object behind an HTTP(S) URL: `GET` to read, `PUT` to overwrite.
pub struct HttpCsvStore {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpCsvStore {
    pub fn new(url: impl Into<String>) -> Result<Self, StoreError> {
        let url = url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StoreError::Http {
                path: url.clone(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self { url, client })
    }

    fn http_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Http {
            path: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl DatasetStore for HttpCsvStore {
    fn location(&self) -> &str {
        &self.url
    }

    fn read(&self) -> Result<DataFrame, StoreError> {
        ensure_csv(&self.url)?;
        let resp = self.client.get(&self.url).send().map_err(|e| self.http_error(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NoExistingFile {
                path: self.url.clone(),
            });
        }
        if !status.is_success() {
            return Err(self.http_error(format!("GET returned {status}")));
        }

        let bytes = resp.bytes().map_err(|e| self.http_error(e))?;
        parse_csv(&self.url, bytes.to_vec())
    }

    fn write(&self, df: &mut DataFrame) -> Result<(), StoreError> {
        let buf = render_csv(&self.url, df)?;
        let resp = self
            .client
            .put(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(buf)
            .send()
            .map_err(|e| self.http_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.http_error(format!("PUT returned {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::empty_frame;

    #[test]
    fn missing_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCsvStore::new(tmp.path().join("data.csv"));
        let err = store.read().unwrap_err();
        assert!(matches!(err, StoreError::NoExistingFile { .. }));
        assert!(err.is_recoverable_on_read());
    }

    #[test]
    fn non_csv_path_is_not_handled() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.parquet");
        std::fs::write(&path, b"whatever").unwrap();

        let err = LocalCsvStore::new(&path).read().unwrap_err();
        assert!(matches!(err, StoreError::FileTypeNotHandled { .. }));
        assert!(err.is_recoverable_on_read());
    }

    #[test]
    fn write_then_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCsvStore::new(tmp.path().join("out").join("data.csv"));

        let mut df = df!(
            "asset_pair" => &["XXBTZEUR", "XXBTZEUR"],
            "tmsp" => &[1000i64, 1060],
        )
        .unwrap();
        store.write(&mut df).unwrap();
        assert!(!tmp.path().join("out").join("data.csv.tmp").exists());

        let back = store.read().unwrap();
        assert_eq!(back.height(), 2);
        assert_eq!(
            back.column("tmsp").unwrap().str().unwrap().get(1),
            Some("1060")
        );
    }

    #[test]
    fn header_only_file_reads_as_empty_table() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCsvStore::new(tmp.path().join("data.csv"));
        store.write(&mut empty_frame()).unwrap();

        let back = store.read().unwrap();
        assert_eq!(back.height(), 0);
        assert_eq!(back.width(), empty_frame().width());
    }

    #[test]
    fn blank_file_has_no_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        std::fs::write(&path, b"").unwrap();
        let back = LocalCsvStore::new(&path).read().unwrap();
        assert_eq!(back.width(), 0);
    }

    #[test]
    fn overwrite_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCsvStore::new(tmp.path().join("data.csv"));
        store.write(&mut df!("a" => &[1i64, 2, 3]).unwrap()).unwrap();
        store.write(&mut df!("a" => &[4i64]).unwrap()).unwrap();
        assert_eq!(store.read().unwrap().height(), 1);
    }

    #[test]
    fn open_store_dispatches_on_scheme() {
        let local = open_store("data/data.csv").unwrap();
        assert_eq!(local.location(), "data/data.csv");

        let remote = open_store("https://bucket.example.com/data.csv").unwrap();
        assert_eq!(remote.location(), "https://bucket.example.com/data.csv");
    }

    #[test]
    fn open_store_rejects_other_schemes() {
        for location in ["s3://cryptolution/data.csv", "gs://bucket/data.csv", "file:///tmp/data.csv"] {
            let err = open_store(location).err().unwrap();
            assert!(matches!(err, StoreError::UnsupportedScheme { .. }), "{location}");
            assert!(!err.is_recoverable_on_read());
        }
    }
}
