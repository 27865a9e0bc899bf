//! Streaming uploader.
//!
//! Pipes a remote file's body straight into storage. The body is never
//! collected in memory; the store decides how much to buffer per part.

use chrono::{DateTime, Utc};
use futures::{StreamExt as _, TryStreamExt as _};
use statsync_storage::{BoxError, Metadata, ObjectStore};

use crate::IngestError;
use crate::http;

/// Metadata key recording where an object was downloaded from.
pub const SOURCE_URL_KEY: &str = "source-url";

/// Metadata key recording the remote last-modified timestamp.
pub const SOURCE_LAST_MODIFIED_KEY: &str = "source-last-modified";

/// Builds the provenance metadata attached to a mirrored file.
#[must_use]
pub fn provenance_metadata(url: &str, remote_last_modified: Option<DateTime<Utc>>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(SOURCE_URL_KEY.to_string(), url.to_string());
    if let Some(ts) = remote_last_modified {
        metadata.insert(SOURCE_LAST_MODIFIED_KEY.to_string(), ts.to_rfc3339());
    }
    metadata
}

/// Streams `url` into `key`. Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`IngestError::Upload`] if either the source request or the
/// destination write fails.
pub async fn stream_to_store(
    client: &reqwest::Client,
    store: &dyn ObjectStore,
    url: &str,
    key: &str,
    remote_last_modified: Option<DateTime<Utc>>,
) -> Result<u64, IngestError> {
    log::info!("Streaming {url} -> {key}");

    let upload_err = |source: BoxError| IngestError::Upload {
        key: key.to_string(),
        source,
    };

    let response = http::get(client, url, "*/*")
        .await
        .map_err(|e| upload_err(Box::new(e)))?;

    let stream = response
        .bytes_stream()
        .map_err(|e| Box::new(e) as BoxError)
        .boxed();

    let metadata = provenance_metadata(url, remote_last_modified);
    let written = store
        .upload_stream(key, stream, &metadata)
        .await
        .map_err(|e| upload_err(Box::new(e)))?;

    #[allow(clippy::cast_precision_loss)] // display-only MB value
    let mb = written as f64 / 1_048_576.0;
    log::debug!("  wrote {key} ({mb:.1} MB)");

    Ok(written)
}
