#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Two-part ingestion.
//!
//! - **Part 1** mirrors the BLS productivity directory into the bucket,
//!   uploading only new or changed files and archiving files that vanished
//!   upstream.
//! - **Part 2** fetches the population API and writes a timestamped
//!   snapshot, which is what triggers the analytics run downstream.
//!
//! The parts run strictly in sequence. A failure in one is reported in the
//! combined [`IngestReport`] without preventing the other from running.

pub mod archive;
pub mod http;
pub mod listing;
pub mod population;
pub mod progress;
pub mod sync;
pub mod upload;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use statsync_config::PipelineConfig;
use statsync_ingest_models::{BlsSyncSummary, IngestReport, IngestStatus, StageOutcome};
use statsync_storage::{BoxError, ObjectStore, StorageError};

pub use http::FetchError;

use crate::progress::ProgressCallback;

/// Errors that abort an ingestion stage or a single file.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// An HTTP collaborator failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The object store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Streaming a file into storage failed on either side.
    #[error("Upload of {key} failed: {source}")]
    Upload {
        /// Destination key.
        key: String,
        /// Source-read or destination-write error.
        source: BoxError,
    },

    /// A payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(serde_json::Error),
}

/// Part 1: mirror the BLS directory into `config.bls_prefix`.
///
/// Per-file failures are counted in the summary; only a failed directory
/// listing aborts the stage.
///
/// # Errors
///
/// Returns [`IngestError::Fetch`] if the directory listing cannot be
/// fetched or parsed.
pub async fn sync_bls(
    config: &PipelineConfig,
    client: &reqwest::Client,
    store: &dyn ObjectStore,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<BlsSyncSummary, IngestError> {
    let prefix = config.bls_prefix.as_str();
    let archive_prefix = config.archive_prefix();

    log::info!("BLS sync: {} -> s3://{}/{prefix}", config.bls_url, store.bucket());

    let files = listing::discover_files(client, &config.bls_url).await?;
    log::info!("Found {} BLS files to process", files.len());

    let remote_names: BTreeSet<String> = files.iter().map(|f| f.name.clone()).collect();
    let stored_names = match store.list(prefix).await {
        Ok(records) => archive::live_file_names(&records, prefix, &archive_prefix),
        Err(e) => {
            log::warn!("Could not list stored files for deletion tracking: {e}");
            Vec::new()
        }
    };
    log::info!("Found {} existing files in storage", stored_names.len());

    let mut summary = BlsSyncSummary {
        total: files.len() as u64,
        ..BlsSyncSummary::default()
    };

    progress.set_total(summary.total);

    for (idx, file) in files.iter().enumerate() {
        let key = format!("{prefix}{}", file.name);
        log::info!("[{}/{}] Processing {}", idx + 1, files.len(), file.name);
        progress.set_message(file.name.clone());

        match sync_file(client, store, &key, file).await {
            Ok(Some(reason)) => {
                summary.uploaded += 1;
                log::info!("  UPLOADED: {} ({reason})", file.name);
            }
            Ok(None) => {
                summary.skipped += 1;
                log::info!("  SKIPPED: {} (up-to-date)", file.name);
            }
            Err(e) => {
                summary.errors += 1;
                log::error!("  ERROR: {} - {e}", file.name);
            }
        }

        progress.inc(1);
    }

    let orphans = archive::orphaned(&stored_names, &remote_names);
    if !orphans.is_empty() {
        log::info!("Found {} orphaned files (removed upstream)", orphans.len());
        let outcome = archive::archive_orphans(store, prefix, &archive_prefix, &orphans).await;
        summary.moved = outcome.moved;
        summary.errors += outcome.errors;
    }

    let summary = summary.finish();
    progress.finish(format!("BLS sync complete: {summary}"));

    log::info!("BLS sync summary:");
    log::info!("  Total files: {}", summary.total);
    log::info!("  Uploaded:    {}", summary.uploaded);
    log::info!("  Skipped:     {}", summary.skipped);
    log::info!("  Moved:       {}", summary.moved);
    log::info!("  Errors:      {}", summary.errors);

    Ok(summary)
}

/// Syncs one file. Returns the upload reason, or `None` if skipped.
async fn sync_file(
    client: &reqwest::Client,
    store: &dyn ObjectStore,
    key: &str,
    file: &statsync_ingest_models::RemoteFileEntry,
) -> Result<Option<statsync_ingest_models::SyncReason>, IngestError> {
    let decision = sync::should_upload(store, key, file.last_modified).await?;
    if !decision.upload {
        return Ok(None);
    }

    upload::stream_to_store(client, store, &file.url, key, file.last_modified).await?;
    Ok(Some(decision.reason))
}

/// Runs both parts and combines their outcomes.
///
/// Never fails: each stage's error is captured in the report.
pub async fn run_ingest(
    config: &PipelineConfig,
    client: &reqwest::Client,
    store: &dyn ObjectStore,
    request_id: Option<String>,
    progress: &Arc<dyn ProgressCallback>,
) -> IngestReport {
    let timestamp = Utc::now().to_rfc3339();

    log::info!("EXECUTING PART 1: BLS Data Sync");
    let part1_bls = match sync_bls(config, client, store, progress).await {
        Ok(summary) => StageOutcome::Completed(summary),
        Err(e) => {
            log::error!("[Part 1] Fatal error: {e}");
            StageOutcome::failed(e)
        }
    };

    log::info!("EXECUTING PART 2: Population Sync");
    let part2_population = match population::sync_population(
        client,
        store,
        &config.population_prefix,
        &config.population_api_url,
    )
    .await
    {
        Ok(summary) => StageOutcome::Completed(summary),
        Err(e) => {
            log::error!("[Part 2] Fatal error: {e}");
            StageOutcome::failed(e)
        }
    };

    let status = IngestStatus::from_parts(part1_bls.succeeded(), part2_population.succeeded());

    log::info!("EXECUTION SUMMARY");
    log::info!("  Overall Status:    {status:?}");
    log::info!(
        "  Part 1 (BLS):      {}",
        if part1_bls.succeeded() { "SUCCESS" } else { "FAILED" }
    );
    log::info!(
        "  Part 2 (Population): {}",
        if part2_population.succeeded() { "SUCCESS" } else { "FAILED" }
    );

    IngestReport {
        timestamp,
        request_id,
        part1_bls,
        part2_population,
        status,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use statsync_storage::memory::MemoryStore;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves fixed `(path, status, body)` routes on a loopback port and
    /// returns the server's base URL. Unknown paths get a 404.
    async fn serve(routes: Vec<(&'static str, u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut request: Vec<u8> = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = socket.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            return;
                        }
                        request.extend_from_slice(&chunk[..n]);
                    }

                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body) = routes
                        .iter()
                        .find(|(route, ..)| *route == path)
                        .map_or((404, String::new()), |(_, status, body)| {
                            (*status, body.clone())
                        });
                    let reason = if status == 200 { "OK" } else { "Not Found" };

                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.ok();
                });
            }
        });

        format!("http://{addr}")
    }

    fn listing_page() -> String {
        [
            "<pre><A HREF=\"/\">[To Parent Directory]</A><br><br>",
            " 1/10/2025  9:02 AM            0 <A HREF=\"../\">..</A><br>",
            " 3/27/2025  8:30 AM            9 <A HREF=\"/pr/good\">good</A><br>",
            " 3/27/2025  8:30 AM            0 <A HREF=\"/pr/missing\">missing</A><br>",
            "</pre>",
        ]
        .join("\n")
    }

    fn config(bls_url: &str, api_url: &str) -> PipelineConfig {
        PipelineConfig::from_lookup(|name| match name {
            "BLS_SYNC_BUCKET" => Some("b".to_string()),
            "BLS_SYNC_USER_AGENT" => Some("tests@example.com".to_string()),
            "BLS_SYNC_URL" => Some(bls_url.to_string()),
            "DATAUSA_API_URL" => Some(api_url.to_string()),
            "SYNC_TIMEOUT_SECS" => Some("1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn unreachable_sources_fail_both_stages() {
        // Port 9 (discard) on localhost refuses connections on test hosts.
        let config = config("http://127.0.0.1:9/pr/", "http://127.0.0.1:9/api");
        let client = http::build_client(&config).unwrap();
        let store = MemoryStore::new("b");

        let report = run_ingest(&config, &client, &store, None, &progress::null_progress()).await;

        assert_eq!(report.status, IngestStatus::Failed);
        assert_eq!(report.status.status_code(), 500);
        assert!(matches!(report.part1_bls, StageOutcome::Failed { .. }));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn mirrors_counts_and_archives_across_runs() {
        let base = serve(vec![
            ("/pr/", 200, listing_page()),
            ("/pr/good", 200, "GOODBYTES".to_string()),
        ])
        .await;
        let config = config(&format!("{base}/pr/"), "http://127.0.0.1:9/api");
        let client = http::build_client(&config).unwrap();
        let store = MemoryStore::new("b");
        let progress = progress::null_progress();
        let stored_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.insert_at("raw/pr/orphan", "old", stored_at);

        // First run: one upload, one failed download, one orphan archived.
        let first = sync_bls(&config, &client, &store, &progress).await.unwrap();
        assert_eq!(
            first,
            BlsSyncSummary {
                total: 2,
                uploaded: 1,
                skipped: 0,
                moved: 1,
                errors: 1,
                success: false,
            }
        );

        let good = store.object("raw/pr/good").unwrap();
        assert_eq!(good.body, b"GOODBYTES");
        assert_eq!(
            good.metadata[upload::SOURCE_URL_KEY],
            format!("{base}/pr/good")
        );
        assert_eq!(
            good.metadata[upload::SOURCE_LAST_MODIFIED_KEY],
            "2025-03-27T08:30:00+00:00"
        );
        assert!(store.object("raw/pr/missing").is_none());
        assert!(store.object("raw/pr/orphan").is_none());
        assert_eq!(store.object("raw/pr/deleted/orphan").unwrap().body, b"old");

        // Second run: the mirrored file is up to date and nothing is re-archived.
        let second = sync_bls(&config, &client, &store, &progress).await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.moved, 0);
        assert_eq!(second.errors, 1);
        assert!(!second.success);

        // A failed stored listing means no orphan tracking, not a failed stage.
        store.insert_at("raw/pr/orphan2", "stale", stored_at);
        store.fail_listing("raw/pr/");
        let third = sync_bls(&config, &client, &store, &progress).await.unwrap();
        assert_eq!(third.moved, 0);
        assert_eq!(third.skipped, 1);
        assert!(store.object("raw/pr/orphan2").is_some());
        assert!(store.object("raw/pr/deleted/orphan2").is_none());
    }

    #[tokio::test]
    async fn invalid_listing_url_aborts_only_part_one() {
        let config = config("not a url", "http://127.0.0.1:9/api");
        let client = http::build_client(&config).unwrap();
        let store = MemoryStore::new("b");

        let err = sync_bls(&config, &client, &store, &progress::null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
    }
}
