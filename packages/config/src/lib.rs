#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built exactly once at the start of an invocation
//! and passed by reference to every stage. Nothing downstream reads the
//! environment on its own.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default |
//! |---|---|---|
//! | `BLS_SYNC_BUCKET` (or `BUCKET_NAME`) | Yes | |
//! | `BLS_SYNC_USER_AGENT` | Yes | |
//! | `BLS_SYNC_URL` | No | [`DEFAULT_BLS_URL`] |
//! | `BLS_SYNC_PREFIX` | No | `raw/pr/` |
//! | `DATAUSA_API_URL` | No | [`DEFAULT_POPULATION_API_URL`] |
//! | `DATAUSA_SYNC_PREFIX` (or `POPULATION_PREFIX`) | No | `raw/datausa/population/` |
//! | `BLS_DATA_KEY` | No | `raw/pr/pr.data.0.Current` |
//! | `ANALYTICS_RESULTS_PREFIX` | No | `analytics/results/` |
//! | `SYNC_TIMEOUT_SECS` | No | `60` |
//! | `S3_ENDPOINT_URL` | No | |

use std::time::Duration;

/// Default BLS productivity time-series directory listing.
pub const DEFAULT_BLS_URL: &str = "https://download.bls.gov/pub/time.series/pr/";

/// Default `DataUSA` population endpoint.
pub const DEFAULT_POPULATION_API_URL: &str = "https://honolulu-api.datausa.io/tesseract/data.jsonrecords?cube=acs_yg_total_population_1&drilldowns=Year%2CNation&locale=en&measures=Population";

/// Default live prefix for mirrored BLS files.
pub const DEFAULT_BLS_PREFIX: &str = "raw/pr/";

/// Default prefix for population snapshots.
pub const DEFAULT_POPULATION_PREFIX: &str = "raw/datausa/population/";

/// Default key of the BLS table consumed by analytics.
pub const DEFAULT_BLS_DATA_KEY: &str = "raw/pr/pr.data.0.Current";

/// Default prefix for analytics result envelopes.
pub const DEFAULT_RESULTS_PREFIX: &str = "analytics/results/";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Name of the archival sub-folder beneath the BLS live prefix.
pub const ARCHIVE_FOLDER: &str = "deleted/";

/// Errors that can occur while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required env var: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// A variable was set but could not be interpreted.
    #[error("Invalid value for {name} ({value:?}): {reason}")]
    Invalid {
        /// Name of the environment variable.
        name: String,
        /// The raw value that was rejected.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Immutable configuration for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bucket holding every object this pipeline reads or writes.
    pub bucket: String,
    /// Sent as the `User-Agent` on every outbound HTTP request.
    pub user_agent: String,
    /// BLS directory listing URL.
    pub bls_url: String,
    /// Live prefix for mirrored BLS files, always ending in `/`.
    pub bls_prefix: String,
    /// Population statistics API URL.
    pub population_api_url: String,
    /// Prefix under which population snapshots are written.
    pub population_prefix: String,
    /// Key of the BLS table loaded by analytics.
    pub bls_data_key: String,
    /// Prefix under which analysis envelopes are written.
    pub results_prefix: String,
    /// Flat per-request timeout.
    pub timeout: Duration,
    /// Optional S3-compatible endpoint override.
    pub endpoint_url: Option<String>,
}

impl PipelineConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] if the bucket or user agent is
    /// unset, or [`ConfigError::Invalid`] if a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bucket = get("BLS_SYNC_BUCKET")
            .or_else(|| get("BUCKET_NAME"))
            .ok_or_else(|| ConfigError::MissingEnv {
                name: "BLS_SYNC_BUCKET".to_string(),
            })?;
        let user_agent = get("BLS_SYNC_USER_AGENT").ok_or_else(|| ConfigError::MissingEnv {
            name: "BLS_SYNC_USER_AGENT".to_string(),
        })?;

        let timeout = match get("SYNC_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            bucket,
            user_agent,
            bls_url: get("BLS_SYNC_URL").unwrap_or_else(|| DEFAULT_BLS_URL.to_string()),
            bls_prefix: normalize_prefix(
                &get("BLS_SYNC_PREFIX").unwrap_or_else(|| DEFAULT_BLS_PREFIX.to_string()),
            ),
            population_api_url: get("DATAUSA_API_URL")
                .unwrap_or_else(|| DEFAULT_POPULATION_API_URL.to_string()),
            population_prefix: normalize_prefix(
                &get("DATAUSA_SYNC_PREFIX")
                    .or_else(|| get("POPULATION_PREFIX"))
                    .unwrap_or_else(|| DEFAULT_POPULATION_PREFIX.to_string()),
            ),
            bls_data_key: get("BLS_DATA_KEY").unwrap_or_else(|| DEFAULT_BLS_DATA_KEY.to_string()),
            results_prefix: normalize_prefix(
                &get("ANALYTICS_RESULTS_PREFIX")
                    .unwrap_or_else(|| DEFAULT_RESULTS_PREFIX.to_string()),
            ),
            timeout,
            endpoint_url: get("S3_ENDPOINT_URL"),
        })
    }

    /// Archival sub-path beneath the BLS live prefix.
    #[must_use]
    pub fn archive_prefix(&self) -> String {
        format!("{}{ARCHIVE_FOLDER}", self.bls_prefix)
    }

    /// Logs the effective configuration.
    pub fn log_summary(&self) {
        log::info!("Configuration:");
        log::info!("  Bucket:            {}", self.bucket);
        log::info!("  User Agent:        {}", self.user_agent);
        log::info!("  BLS URL:           {}", self.bls_url);
        log::info!("  BLS Prefix:        {}", self.bls_prefix);
        log::info!("  Population URL:    {}", self.population_api_url);
        log::info!("  Population Prefix: {}", self.population_prefix);
        log::info!("  BLS Data Key:      {}", self.bls_data_key);
        log::info!("  Results Prefix:    {}", self.results_prefix);
        log::info!("  Timeout:           {}s", self.timeout.as_secs());
        if let Some(endpoint) = &self.endpoint_url {
            log::info!("  Endpoint:          {endpoint}");
        }
    }
}

/// Ensures a non-empty prefix ends with exactly one `/`.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "SYNC_TIMEOUT_SECS".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("expected a whole number of seconds"))?;
    if secs == 0 {
        return Err(invalid("timeout must be positive"));
    }
    Ok(Duration::from_secs(secs))
}
