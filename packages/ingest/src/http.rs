//! Outbound HTTP client and fetch errors.

use statsync_config::PipelineConfig;

/// Errors from an HTTP collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network, timeout, or body-read failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Response body was not valid JSON.
    #[error("Invalid JSON from {url}: {source}")]
    Json {
        /// Request URL.
        url: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A URL could not be parsed or joined.
    #[error("Invalid URL {url}: {reason}")]
    Url {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Builds the client shared by every request in an invocation.
///
/// Every request carries the configured `User-Agent` and the flat
/// per-request timeout. No retries are layered on top.
///
/// # Errors
///
/// Returns [`FetchError::Http`] if the TLS backend fails to initialise.
pub fn build_client(config: &PipelineConfig) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .build()
        .map_err(FetchError::Http)
}

/// Sends a GET and fails on any non-success status.
pub(crate) async fn get(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
) -> Result<reqwest::Response, FetchError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, accept)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(response)
}
