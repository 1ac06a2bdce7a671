//! Asset pair directory.
//!
//! The provider lists every tradable pair keyed by its identifier (`XXBTZEUR`)
//! with a display name (`XBT/EUR`). Cleaning splits that name into base asset
//! and quote currency and optionally keeps only the pairs quoted in a common
//! currency. The directory is rebuilt on every run; the only persisted copy is
//! the pairs JSON file read by the dashboard.

use super::provider::RawAssetPair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Quote currencies kept by default.
pub const DEFAULT_CURRENCIES: &[&str] = &["EUR", "USD"];

/// One cleaned asset pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    /// Provider identifier; the key in the directory and in the pairs file.
    #[serde(skip)]
    pub id: String,
    pub wsname: String,
    pub asset: String,
    pub currency: String,
}

impl AssetPair {
    /// Split a `BASE/QUOTE` display name. `None` unless both sides are non-empty.
    pub fn from_wsname(id: &str, wsname: &str) -> Option<Self> {
        let (asset, currency) = wsname.split_once('/')?;
        let (asset, currency) = (asset.trim(), currency.trim());
        if asset.is_empty() || currency.is_empty() || currency.contains('/') {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            wsname: wsname.trim().to_string(),
            asset: asset.to_string(),
            currency: currency.to_string(),
        })
    }
}

/// Cleaned pairs in deterministic (sorted identifier) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairDirectory {
    pairs: BTreeMap<String, AssetPair>,
}

impl PairDirectory {
    pub fn iter(&self) -> impl Iterator<Item = &AssetPair> {
        self.pairs.values()
    }

    pub fn get(&self, id: &str) -> Option<&AssetPair> {
        self.pairs.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.pairs.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Keep only the first `max` pairs in iteration order.
    pub fn truncate(&mut self, max: usize) {
        if self.pairs.len() > max {
            let cut = self.pairs.keys().nth(max).cloned();
            if let Some(cut) = cut {
                let _ = self.pairs.split_off(&cut);
            }
        }
    }

    /// The directory in the provider's raw shape, for re-cleaning.
    pub fn to_raw(&self) -> BTreeMap<String, RawAssetPair> {
        self.pairs
            .iter()
            .map(|(id, p)| (id.clone(), RawAssetPair::new(p.wsname.clone())))
            .collect()
    }
}

impl FromIterator<AssetPair> for PairDirectory {
    fn from_iter<I: IntoIterator<Item = AssetPair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

/// Normalize the provider's raw listing into a directory.
///
/// With `keep_common_currencies`, only identifiers ending with one of
/// `currencies` survive. Pairs whose display name cannot be split are skipped
/// with a warning. Applying this to its own output is a no-op.
pub fn clean_asset_pairs(
    raw: &BTreeMap<String, RawAssetPair>,
    keep_common_currencies: bool,
    currencies: &[String],
) -> PairDirectory {
    raw.iter()
        .filter(|(id, _)| {
            !keep_common_currencies || currencies.iter().any(|c| id.ends_with(c.as_str()))
        })
        .filter_map(|(id, meta)| {
            let Some(wsname) = meta.wsname.as_deref() else {
                warn!(pair = %id, "no display name, pair skipped");
                return None;
            };
            let pair = AssetPair::from_wsname(id, wsname);
            if pair.is_none() {
                warn!(pair = %id, wsname, "display name is not BASE/QUOTE, pair skipped");
            }
            pair
        })
        .collect()
}

/// Default allow-list as owned strings.
pub fn default_currencies() -> Vec<String> {
    DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect()
}

// ── Pairs file ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PairsFileError {
    #[error("pairs file I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pairs file JSON error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Write `pair -> {wsname, asset, currency}` with sorted keys, 4-space indent.
pub fn write_pairs_file(path: &Path, directory: &PairDirectory) -> Result<(), PairsFileError> {
    let path_str = path.display().to_string();
    let io_err = |source| PairsFileError::Io {
        path: path_str.clone(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    directory
        .pairs
        .serialize(&mut ser)
        .map_err(|source| PairsFileError::Json {
            path: path_str.clone(),
            source,
        })?;

    std::fs::write(path, buf).map_err(io_err)
}

/// Read a pairs file written by [`write_pairs_file`].
pub fn read_pairs_file(path: &Path) -> Result<PairDirectory, PairsFileError> {
    let path_str = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| PairsFileError::Io {
        path: path_str.clone(),
        source,
    })?;
    let pairs: BTreeMap<String, AssetPair> =
        serde_json::from_str(&content).map_err(|source| PairsFileError::Json {
            path: path_str,
            source,
        })?;

    Ok(pairs
        .into_iter()
        .map(|(id, mut pair)| {
            pair.id = id;
            pair
        })
        .collect())
}

// ── Asset names ──────────────────────────────────────────────────────

/// Base asset code to human-readable name (`XBT` -> `Bitcoin`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AssetNames {
    names: BTreeMap<String, String>,
}

impl AssetNames {
    pub fn from_file(path: &Path) -> Result<Self, PairsFileError> {
        let path_str = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| PairsFileError::Io {
            path: path_str.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| PairsFileError::Json {
            path: path_str,
            source,
        })
    }

    /// Display name for `code`, or the code itself when unknown.
    pub fn display_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.names.get(code).map(|s| s.as_str()).unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
