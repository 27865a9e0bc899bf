#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Analytics stage.
//!
//! Loads the mirrored BLS table and the latest population snapshot,
//! computes the three reports, and saves the result envelope back to the
//! object store.

pub mod load;
pub mod reports;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statsync_analytics_models::{Analyses, AnalysisEnvelope, AnalysisStatus, ErrorBody};
use statsync_config::PipelineConfig;
use statsync_storage::{Metadata, ObjectStore, StorageError};
use thiserror::Error;

/// Errors that abort an analytics run.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The object store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A required input object could not be read.
    #[error("Failed to fetch {key}: {reason}")]
    Fetch {
        /// Object key.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// The BLS table is not valid tab-separated data.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A snapshot or result is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A BLS row could not be interpreted.
    #[error("Parse error at line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: u64,
        /// What went wrong.
        reason: String,
    },

    /// A population snapshot has an unrecognized JSON shape.
    #[error("Unsupported population payload in {key}: {reason}")]
    UnsupportedPayload {
        /// Snapshot key.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// An aggregation produced no rows where rows were expected.
    #[error("{message}")]
    Compute {
        /// What went wrong.
        message: String,
    },
}

/// Status code and JSON body of an analytics invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResponse {
    /// `200` or `500`.
    pub status_code: u16,
    /// Envelope or error body.
    pub body: serde_json::Value,
}

/// Key the envelope for a run finishing at `now` is saved under.
#[must_use]
pub fn results_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/analysis_results_{}.json",
        prefix.trim_end_matches('/'),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Loads both inputs and computes the reports.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if either input cannot be loaded.
pub async fn compute_analyses(
    config: &PipelineConfig,
    store: &dyn ObjectStore,
) -> Result<Analyses, AnalyticsError> {
    let bls = load::load_bls_table(store, &config.bls_data_key).await?;
    let population = load::load_population_table(store, &config.population_prefix).await?;

    log::info!("Running Q1: population statistics");
    let population_stats = reports::population_stats(&population);

    log::info!("Running Q2: best year per series");
    let best_years = reports::best_years(&bls);

    log::info!("Running Q3: series with population");
    let series_with_population = reports::series_with_population(&bls, &population);

    Ok(Analyses {
        population_stats,
        best_years,
        series_with_population,
    })
}

async fn save_envelope(
    store: &dyn ObjectStore,
    key: &str,
    envelope: &AnalysisEnvelope,
) -> Result<(), AnalyticsError> {
    let body = serde_json::to_vec_pretty(envelope)?;
    store
        .put(key, body, &Metadata::new(), "application/json")
        .await?;
    Ok(())
}

/// Runs the analytics stage and saves its envelope.
///
/// A failed save is reported inside the envelope and still returns `200`;
/// a failure to load or compute returns `500` with an [`ErrorBody`].
pub async fn run_analysis(config: &PipelineConfig, store: &dyn ObjectStore) -> InvocationResponse {
    run_analysis_at(config, store, Utc::now()).await
}

async fn run_analysis_at(
    config: &PipelineConfig,
    store: &dyn ObjectStore,
    now: DateTime<Utc>,
) -> InvocationResponse {
    let analyses = match compute_analyses(config, store).await {
        Ok(analyses) => analyses,
        Err(e) => return failure(&e, now),
    };

    let mut envelope = AnalysisEnvelope {
        timestamp: now.to_rfc3339(),
        status: AnalysisStatus::Success,
        analyses,
        s3_location: None,
        s3_save_error: None,
    };

    let key = results_key(&config.results_prefix, now);
    match save_envelope(store, &key, &envelope).await {
        Ok(()) => {
            let location = statsync_storage::location(store.bucket(), &key);
            log::info!("Results saved to {location}");
            envelope.s3_location = Some(location);
        }
        Err(e) => {
            log::error!("Failed to save results: {e}");
            envelope.s3_save_error = Some(e.to_string());
        }
    }

    match serde_json::to_value(&envelope) {
        Ok(body) => InvocationResponse {
            status_code: 200,
            body,
        },
        Err(e) => failure(&AnalyticsError::Json(e), now),
    }
}

fn failure(error: &AnalyticsError, now: DateTime<Utc>) -> InvocationResponse {
    log::error!("Analytics failed: {error}");

    let body = ErrorBody {
        status: AnalysisStatus::Error,
        error: error.to_string(),
        timestamp: now.to_rfc3339(),
    };

    InvocationResponse {
        status_code: 500,
        body: serde_json::to_value(&body)
            .unwrap_or_else(|_| serde_json::Value::String(body.error.clone())),
    }
}
