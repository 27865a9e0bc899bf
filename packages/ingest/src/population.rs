//! Population API fetcher and snapshot writer.
//!
//! Every run writes a new, timestamp-named snapshot. Older snapshots are
//! never overwritten or pruned here.

use chrono::{DateTime, Utc};
use statsync_ingest_models::PopulationSyncSummary;
use statsync_storage::{Metadata, ObjectStore};

use crate::IngestError;
use crate::http::{self, FetchError};

/// Fetches the API once and parses the body as JSON.
///
/// # Errors
///
/// Returns [`FetchError`] on network, timeout, status, or JSON failures.
pub async fn fetch_population(
    client: &reqwest::Client,
    api_url: &str,
) -> Result<serde_json::Value, FetchError> {
    log::info!("Fetching population data from {api_url}");

    let body = http::get(client, api_url, "application/json")
        .await?
        .text()
        .await?;
    let payload: serde_json::Value =
        serde_json::from_str(&body).map_err(|source| FetchError::Json {
            url: api_url.to_string(),
            source,
        })?;

    log::info!("Fetched {} population records", record_count(&payload));
    Ok(payload)
}

/// Number of entries in the payload's top-level `data` array, or 0.
#[must_use]
pub fn record_count(payload: &serde_json::Value) -> u64 {
    payload
        .get("data")
        .and_then(serde_json::Value::as_array)
        .map_or(0, |rows| rows.len() as u64)
}

/// Key for a snapshot taken at `now`, at second precision.
#[must_use]
pub fn snapshot_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/population_{}.json",
        prefix.trim_end_matches('/'),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Writes `payload` verbatim (pretty-printed) as a new snapshot.
///
/// Returns the key written.
///
/// # Errors
///
/// Returns [`IngestError::Storage`] if the write fails.
pub async fn write_snapshot(
    store: &dyn ObjectStore,
    prefix: &str,
    payload: &serde_json::Value,
    api_url: &str,
    now: DateTime<Utc>,
) -> Result<String, IngestError> {
    let key = snapshot_key(prefix, now);
    log::info!("Saving population snapshot to s3://{}/{key}", store.bucket());

    let body = serde_json::to_vec_pretty(payload).map_err(IngestError::Serialize)?;

    let mut metadata = Metadata::new();
    metadata.insert("source-url".to_string(), api_url.to_string());
    metadata.insert("ingestion-timestamp".to_string(), now.to_rfc3339());
    metadata.insert("record-count".to_string(), record_count(payload).to_string());

    store
        .put(&key, body, &metadata, "application/json")
        .await?;

    Ok(key)
}

/// Part B: fetch the API and write one snapshot.
///
/// # Errors
///
/// Returns [`IngestError`] if the fetch or the write fails.
pub async fn sync_population(
    client: &reqwest::Client,
    store: &dyn ObjectStore,
    prefix: &str,
    api_url: &str,
) -> Result<PopulationSyncSummary, IngestError> {
    let payload = fetch_population(client, api_url).await?;
    let s3_key = write_snapshot(store, prefix, &payload, api_url, Utc::now()).await?;

    let summary = PopulationSyncSummary {
        success: true,
        s3_key,
        record_count: record_count(&payload),
        api_url: api_url.to_string(),
    };

    log::info!("Population sync summary:");
    log::info!("  Records:  {}", summary.record_count);
    log::info!("  Key:      {}", summary.s3_key);

    Ok(summary)
}
