//! Apache-style directory listing parser.
//!
//! The BLS download server renders each file as a line of the form
//!
//! ```text
//!  3/27/2025  8:30 AM        10523 <A HREF="/pub/time.series/pr/pr.class">pr.class</A><br>
//! ```
//!
//! Directory rows carry `<dir>` instead of a size and never match.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::Url;
use statsync_ingest_models::RemoteFileEntry;

use crate::http::{self, FetchError};

/// Timestamp format used by the listing, interpreted as UTC.
const LISTING_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M %p";

static LISTING_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(\d{1,2}/\d{1,2}/\d{4})\s+(\d{1,2}:\d{2}\s+(?:AM|PM))\s+\d+\s+<a\s+href="([^"]+)">([^<]+)</a>"#,
    )
    .unwrap_or_else(|_| unreachable!())
});

/// Fetches the listing page once and parses it.
///
/// # Errors
///
/// Returns [`FetchError`] on network, timeout, or status failures, or if
/// `base_url` is not a valid URL.
pub async fn discover_files(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<RemoteFileEntry>, FetchError> {
    log::info!("Fetching directory listing from {base_url}");

    let html = http::get(client, base_url, "*/*").await?.text().await?;
    parse_listing(&html, base_url)
}

/// Extracts file entries from listing HTML, in document order.
///
/// Parent/self links and any href ending in `/` are skipped. Rows whose
/// timestamp doesn't parse are kept with `last_modified = None`.
///
/// # Errors
///
/// Returns [`FetchError::Url`] if `base_url` is not a valid URL or an href
/// cannot be resolved against it.
pub fn parse_listing(html: &str, base_url: &str) -> Result<Vec<RemoteFileEntry>, FetchError> {
    let base = Url::parse(base_url).map_err(|e| FetchError::Url {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    let mut files = Vec::new();

    for caps in LISTING_ROW_RE.captures_iter(html) {
        let href = &caps[3];
        if href == "../" || href == "./" || href.ends_with('/') {
            continue;
        }

        let url = base.join(href).map_err(|e| FetchError::Url {
            url: href.to_string(),
            reason: e.to_string(),
        })?;

        let last_modified = parse_listing_timestamp(&caps[1], &caps[2]);
        if last_modified.is_none() {
            log::warn!("Unparseable timestamp for {href}: {} {}", &caps[1], &caps[2]);
        }

        files.push(RemoteFileEntry {
            name: caps[4].trim().to_string(),
            url: url.to_string(),
            last_modified,
        });
    }

    log::debug!("Parsed {} file entries from listing", files.len());
    Ok(files)
}

/// Parses a `month/day/year hour:minute AM|PM` pair as UTC.
#[must_use]
pub fn parse_listing_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let time = time.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&format!("{} {time}", date.trim()), LISTING_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://download.bls.gov/pub/time.series/pr/";

    const LISTING: &str = r#"<html><head><title>download.bls.gov - /pub/time.series/pr/</title></head><body>
<H1>download.bls.gov - /pub/time.series/pr/</H1><hr>
<pre><A HREF="/pub/time.series/">[To Parent Directory]</A><br><br>
 1/10/2025  9:02 AM            0 <A HREF="../">..</A><br>
 3/27/2025  8:30 AM        10523 <A HREF="/pub/time.series/pr/pr.class">pr.class</A><br>
 2/13/2025  8:31 AM     42111876 <A HREF="/pub/time.series/pr/pr.data.0.Current">pr.data.0.Current</A><br>
 2/13/2025  8:31 AM        &lt;dir&gt; <A HREF="/pub/time.series/pr/archive/">archive</A><br>
</pre><hr></body></html>"#;

    #[test]
    fn skips_parent_link_and_keeps_document_order() {
        let files = parse_listing(LISTING, BASE).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "pr.class");
        assert_eq!(files[1].name, "pr.data.0.Current");
        assert_eq!(
            files[1].url,
            "https://download.bls.gov/pub/time.series/pr/pr.data.0.Current"
        );
    }

    #[test]
    fn parses_timestamps_as_utc() {
        let files = parse_listing(LISTING, BASE).unwrap();
        assert_eq!(
            files[0].last_modified.unwrap().to_string(),
            "2025-03-27 08:30:00 UTC"
        );
    }

    #[test]
    fn pm_times_are_afternoon() {
        let dt = parse_listing_timestamp("12/01/2024", "1:05 PM").unwrap();
        assert_eq!(dt.to_string(), "2024-12-01 13:05:00 UTC");
    }

    #[test]
    fn malformed_timestamp_keeps_entry() {
        let html = r#" 13/45/2025  8:30 AM   12 <a href="pr.series">pr.series</a>"#;
        let files = parse_listing(html, BASE).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].last_modified.is_none());
        assert_eq!(
            files[0].url,
            "https://download.bls.gov/pub/time.series/pr/pr.series"
        );
    }

    #[test]
    fn skips_directory_hrefs() {
        let html = r#" 1/1/2025  1:00 AM   12 <a href="sub/">sub</a>"#;
        assert!(parse_listing(html, BASE).unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            parse_listing(LISTING, "not a url"),
            Err(FetchError::Url { .. })
        ));
    }
}
