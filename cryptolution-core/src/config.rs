//! Collector configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) describes
//! the daily EUR/USD collection into `data/data.csv`.

use crate::data::ingest::IngestOptions;
use crate::data::kraken::{DEFAULT_API_BASE_URL, DEFAULT_KEY_ENV_VAR};
use crate::data::pairs::default_currencies;
use crate::data::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_secs: policy.delay.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Key file: API key on the first line, secret on the second.
    pub key_file: Option<PathBuf>,
    /// Environment variable holding the API key when no key file is usable.
    pub env_var: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            env_var: DEFAULT_KEY_ENV_VAR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Bucket width in minutes, as the provider's `interval` parameter.
    pub interval_minutes: u32,
    /// Local path or HTTP(S) URL of the dataset CSV.
    pub storage_path: String,
    pub pairs_file: PathBuf,
    pub asset_names_file: Option<PathBuf>,
    pub currencies: Vec<String>,
    pub keep_common_currencies: bool,
    pub max_pairs: Option<usize>,
    pub api_base_url: String,
    pub retry: RetryConfig,
    pub credentials: CredentialsConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 1440,
            storage_path: "data/data.csv".to_string(),
            pairs_file: PathBuf::from("data/pairs.json"),
            asset_names_file: None,
            currencies: default_currencies(),
            keep_common_currencies: true,
            max_pairs: Some(400),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            retry: RetryConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl CollectorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::Invalid("interval_minutes must be positive".into()));
        }
        if self.keep_common_currencies && self.currencies.is_empty() {
            return Err(ConfigError::Invalid(
                "currencies is empty but keep_common_currencies is set".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.delay_secs),
        )
    }

    /// Run options; the pairs file is only included when `update_pairs` is set.
    pub fn ingest_options(&self, update_pairs: bool) -> IngestOptions {
        IngestOptions {
            interval_minutes: self.interval_minutes,
            keep_common_currencies: self.keep_common_currencies,
            currencies: self.currencies.clone(),
            max_pairs: self.max_pairs,
            pairs_file: update_pairs.then(|| self.pairs_file.clone()),
            retry: self.retry_policy(),
        }
    }
}
