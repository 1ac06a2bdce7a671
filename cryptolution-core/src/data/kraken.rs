//! Kraken public REST API provider.
//!
//! Two endpoints are used: `AssetPairs` for the pair listing and `OHLC` for the
//! candle series. Every answer is wrapped in `{"error": [...], "result": {...}}`;
//! a non-empty error list is classified as transient (service busy, rate limit)
//! or permanent (unknown pair and the like).

use super::provider::{MarketDataProvider, OhlcSeries, ProviderError, RawAssetPair};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE_URL: &str = "https://api.kraken.com";
pub const DEFAULT_KEY_ENV_VAR: &str = "KRAKEN_KEY";

/// API credentials handed to the provider at construction time.
///
/// Public endpoints do not need them; when a key is present it is sent as the
/// `API-Key` header.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    key: Option<String>,
    secret: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(key: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            key: Some(key.into()),
            secret,
        }
    }

    /// Parse a key file: API key on the first line, secret on the second.
    pub fn from_key_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        Ok(Self {
            key: lines.next().map(String::from),
            secret: lines.next().map(String::from),
        })
    }

    /// Read the API key from an environment variable.
    pub fn from_env(var: &str) -> Self {
        Self {
            key: std::env::var(var).ok().filter(|v| !v.is_empty()),
            secret: None,
        }
    }

    /// Key file first, environment variable as fallback, anonymous otherwise.
    pub fn resolve(key_file: Option<&Path>, env_var: &str) -> Self {
        if let Some(path) = key_file {
            match Self::from_key_file(path) {
                Ok(creds) if creds.key.is_some() => return creds,
                Ok(_) => debug!(path = %path.display(), "key file is empty"),
                Err(e) => debug!(path = %path.display(), error = %e, "key file not readable"),
            }
        }
        Self::from_env(env_var)
    }

    pub fn api_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.key.is_none()
    }
}

/// Response envelope shared by every Kraken endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

/// Kraken REST provider.
pub struct KrakenProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
}

impl KrakenProvider {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cryptolution/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::ProviderUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn public_url(&self, method: &str) -> String {
        format!("{}/0/public/{method}", self.base_url)
    }

    /// GET a public endpoint and decode its envelope.
    fn query_public<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<Envelope<T>, ProviderError> {
        let mut request = self.client.get(self.public_url(method)).query(params);
        if let Some(key) = self.credentials.api_key() {
            request = request.header("API-Key", key);
        }

        let resp = request
            .send()
            .map_err(|e| ProviderError::ProviderUnavailable(format!("{method}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::ProviderUnavailable(format!(
                "{method}: HTTP {status}"
            )));
        }

        resp.json::<Envelope<T>>().map_err(|e| {
            ProviderError::ProviderUnavailable(format!("{method}: undecodable response: {e}"))
        })
    }
}

/// Service-side conditions that go away on their own.
fn is_transient_error(message: &str) -> bool {
    message.starts_with("EService:")
        || message.starts_with("EAPI:Rate limit")
        || message.starts_with("EGeneral:Too many requests")
        || message.starts_with("EGeneral:Temporary lockout")
}

/// Map a non-empty envelope error list to a `ProviderError`.
fn classify_errors(pair: Option<&str>, errors: &[String]) -> ProviderError {
    let joined = errors.join("; ");
    if errors.iter().any(|e| is_transient_error(e)) {
        return ProviderError::ProviderUnavailable(joined);
    }
    match pair {
        Some(pair) => ProviderError::PairRejected {
            pair: pair.to_string(),
            reason: joined,
        },
        None => ProviderError::ResponseFormatChanged(joined),
    }
}

/// Pull the candle array for `pair` out of an OHLC `result` object.
///
/// The object holds the pair's array plus a `last` cursor. The array is looked
/// up by the requested identifier first; if the provider answered under another
/// spelling, the only array-valued entry is taken.
fn parse_ohlc_result(
    pair: &str,
    mut result: BTreeMap<String, Value>,
) -> Result<OhlcSeries, ProviderError> {
    let last = result.remove("last").and_then(|v| v.as_i64());

    let series = match result.remove(pair) {
        Some(series) => series,
        None => {
            let mut arrays = result.into_iter().filter(|(_, v)| v.is_array());
            match (arrays.next(), arrays.next()) {
                (Some((_, series)), None) => series,
                _ => {
                    return Err(ProviderError::ResponseFormatChanged(format!(
                        "OHLC result has no series for {pair}"
                    )))
                }
            }
        }
    };

    let rows = match series {
        Value::Array(rows) => rows
            .into_iter()
            .map(|row| match row {
                Value::Array(fields) => Ok(fields),
                other => Err(ProviderError::ResponseFormatChanged(format!(
                    "OHLC row for {pair} is not an array: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(ProviderError::ResponseFormatChanged(format!(
                "OHLC series for {pair} is not an array: {other}"
            )))
        }
    };

    Ok(OhlcSeries {
        pair: pair.to_string(),
        rows,
        last,
    })
}

impl MarketDataProvider for KrakenProvider {
    fn name(&self) -> &str {
        "kraken"
    }

    fn asset_pairs(&self) -> Result<BTreeMap<String, RawAssetPair>, ProviderError> {
        let envelope: Envelope<BTreeMap<String, RawAssetPair>> =
            self.query_public("AssetPairs", &[])?;
        if !envelope.error.is_empty() {
            return Err(classify_errors(None, &envelope.error));
        }
        envelope
            .result
            .ok_or_else(|| ProviderError::ResponseFormatChanged("AssetPairs: no result".into()))
    }

    fn ohlc(
        &self,
        pair: &str,
        interval_minutes: u32,
        since: i64,
    ) -> Result<OhlcSeries, ProviderError> {
        let params = [
            ("pair", pair.to_string()),
            ("interval", interval_minutes.to_string()),
            ("since", since.to_string()),
        ];
        let envelope: Envelope<BTreeMap<String, Value>> = self.query_public("OHLC", &params)?;
        if !envelope.error.is_empty() {
            return Err(classify_errors(Some(pair), &envelope.error));
        }
        let result = envelope.result.ok_or_else(|| {
            ProviderError::ResponseFormatChanged(format!("OHLC: no result for {pair}"))
        })?;
        parse_ohlc_result(pair, result)
    }
}
