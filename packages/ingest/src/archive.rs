//! Orphan archiver.
//!
//! Files that disappear from the remote listing are moved (copy, then
//! delete) into the archive sub-path instead of being deleted.

use std::collections::BTreeSet;

use statsync_storage::{ObjectRecord, ObjectStore};

/// Counters from one archive pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOutcome {
    /// Files moved into the archive.
    pub moved: u64,
    /// Files whose move failed.
    pub errors: u64,
}

/// Extracts the file names stored directly under `prefix`.
///
/// Anything under `archive_prefix` and anything nested deeper than one
/// level is ignored, so archived files are never re-selected.
#[must_use]
pub fn live_file_names(records: &[ObjectRecord], prefix: &str, archive_prefix: &str) -> Vec<String> {
    records
        .iter()
        .filter(|r| !r.key.starts_with(archive_prefix))
        .filter_map(|r| r.key.strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .map(str::to_string)
        .collect()
}

/// Returns `stored - remote`, preserving the order of `stored`.
#[must_use]
pub fn orphaned(stored: &[String], remote: &BTreeSet<String>) -> Vec<String> {
    stored
        .iter()
        .filter(|name| !remote.contains(*name))
        .cloned()
        .collect()
}

/// Moves each orphan from `prefix` into `archive_prefix`.
///
/// Each move is independent: a failure is logged and counted, and the
/// remaining files are still processed.
pub async fn archive_orphans(
    store: &dyn ObjectStore,
    prefix: &str,
    archive_prefix: &str,
    orphans: &[String],
) -> ArchiveOutcome {
    let mut outcome = ArchiveOutcome::default();

    for name in orphans {
        let live_key = format!("{prefix}{name}");
        let archived_key = format!("{archive_prefix}{name}");

        let result = match store.copy(&live_key, &archived_key).await {
            Ok(()) => store.delete(&live_key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                outcome.moved += 1;
                log::info!("  MOVED: {name} -> {archived_key}");
            }
            Err(e) => {
                outcome.errors += 1;
                log::error!("  ERROR moving {name}: {e}");
            }
        }
    }

    outcome
}
