#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion decision, summary, and report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file discovered in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    /// File name as shown in the listing.
    pub name: String,
    /// Absolute download URL.
    pub url: String,
    /// Remote last-modified time, absent if the listing text didn't parse.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Why a file was or wasn't uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncReason {
    /// Nothing stored at the key yet.
    New,
    /// Remote timestamp unknown, so refresh unconditionally.
    NoTimestamp,
    /// Remote copy is strictly newer than the stored one.
    Updated,
    /// Stored copy is at least as new as the remote one.
    UpToDate,
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::NoTimestamp => write!(f, "no-timestamp"),
            Self::Updated => write!(f, "updated"),
            Self::UpToDate => write!(f, "up-to-date"),
        }
    }
}

/// Outcome of the incremental sync check for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDecision {
    /// Whether the file should be fetched and uploaded.
    pub upload: bool,
    /// Why.
    pub reason: SyncReason,
}

impl SyncDecision {
    /// Decision to upload for `reason`.
    #[must_use]
    pub const fn upload(reason: SyncReason) -> Self {
        Self {
            upload: true,
            reason,
        }
    }

    /// Decision to skip an up-to-date file.
    #[must_use]
    pub const fn skip() -> Self {
        Self {
            upload: false,
            reason: SyncReason::UpToDate,
        }
    }
}

/// Counters for one BLS sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsSyncSummary {
    /// Number of files discovered remotely.
    pub total: u64,
    /// Files streamed into storage.
    pub uploaded: u64,
    /// Files already up to date.
    pub skipped: u64,
    /// Orphans moved into the archive sub-path.
    pub moved: u64,
    /// Per-file failures (sync or archive).
    pub errors: u64,
    /// `true` when `errors == 0`.
    pub success: bool,
}

impl BlsSyncSummary {
    /// Recomputes [`Self::success`] from the error counter.
    #[must_use]
    pub const fn finish(mut self) -> Self {
        self.success = self.errors == 0;
        self
    }
}

impl std::fmt::Display for BlsSyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} total, {} uploaded, {} skipped, {} moved, {} errors",
            self.total, self.uploaded, self.skipped, self.moved, self.errors
        )
    }
}

/// Result of one population snapshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationSyncSummary {
    /// Always `true`; failures are reported as [`StageOutcome::Failed`].
    pub success: bool,
    /// Key the snapshot was written to.
    pub s3_key: String,
    /// Entries in the payload's `data` array.
    pub record_count: u64,
    /// API the payload was fetched from.
    pub api_url: String,
}

/// Either a stage's summary, or the error that aborted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutcome<T> {
    /// The stage ran to completion.
    Completed(T),
    /// The stage aborted.
    Failed {
        /// Always `false`.
        success: bool,
        /// Error description.
        error: String,
    },
}

impl<T> StageOutcome<T> {
    /// Builds a failed outcome from any displayable error.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed {
            success: false,
            error: error.to_string(),
        }
    }
}

impl StageOutcome<BlsSyncSummary> {
    /// Whether the BLS stage completed with zero errors.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        match self {
            Self::Completed(summary) => summary.success,
            Self::Failed { .. } => false,
        }
    }
}

impl StageOutcome<PopulationSyncSummary> {
    /// Whether the population stage wrote a snapshot.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Overall ingestion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Both stages succeeded.
    Success,
    /// Exactly one stage succeeded.
    PartialSuccess,
    /// Neither stage succeeded.
    Failed,
}

impl IngestStatus {
    /// Combines the two stage results.
    #[must_use]
    pub const fn from_parts(bls_ok: bool, population_ok: bool) -> Self {
        match (bls_ok, population_ok) {
            (true, true) => Self::Success,
            (true, false) | (false, true) => Self::PartialSuccess,
            (false, false) => Self::Failed,
        }
    }

    /// HTTP-style status code surfaced to the caller.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::PartialSuccess => 207,
            Self::Failed => 500,
        }
    }
}

/// Combined result of both ingestion stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// When the invocation started (RFC 3339).
    pub timestamp: String,
    /// Caller-supplied request id, if any.
    pub request_id: Option<String>,
    /// Part A: BLS mirror.
    pub part1_bls: StageOutcome<BlsSyncSummary>,
    /// Part B: population snapshot.
    pub part2_population: StageOutcome<PopulationSyncSummary>,
    /// Overall status.
    pub status: IngestStatus,
}
