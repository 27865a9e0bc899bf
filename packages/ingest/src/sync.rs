//! Incremental sync decision.

use chrono::{DateTime, Utc};
use statsync_ingest_models::{SyncDecision, SyncReason};
use statsync_storage::{Lookup, ObjectRecord, ObjectStore, StorageError};

/// Decides whether a remote file must be (re-)uploaded.
///
/// Order matters: a missing object is `new` even when the remote timestamp
/// is unknown.
#[must_use]
pub fn decide(
    remote_last_modified: Option<DateTime<Utc>>,
    stored: &Lookup<ObjectRecord>,
) -> SyncDecision {
    let Lookup::Found(record) = stored else {
        return SyncDecision::upload(SyncReason::New);
    };

    match remote_last_modified {
        None => SyncDecision::upload(SyncReason::NoTimestamp),
        Some(remote) if remote > record.last_modified => {
            SyncDecision::upload(SyncReason::Updated)
        }
        Some(_) => SyncDecision::skip(),
    }
}

/// Looks up `key` once and applies [`decide`].
///
/// # Errors
///
/// Propagates any storage failure other than "not found".
pub async fn should_upload(
    store: &dyn ObjectStore,
    key: &str,
    remote_last_modified: Option<DateTime<Utc>>,
) -> Result<SyncDecision, StorageError> {
    let stored = store.head(key).await?;
    Ok(decide(remote_last_modified, &stored))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use statsync_storage::memory::MemoryStore;

    use super::*;

    fn record(ts: DateTime<Utc>) -> Lookup<ObjectRecord> {
        Lookup::Found(ObjectRecord {
            key: "raw/pr/pr.class".to_string(),
            last_modified: ts,
            size: 1,
            metadata: statsync_storage::Metadata::new(),
        })
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 27, hour, 0, 0).unwrap()
    }

    #[test]
    fn missing_object_is_new() {
        assert_eq!(
            decide(Some(at(8)), &Lookup::NotFound),
            SyncDecision::upload(SyncReason::New)
        );
        assert_eq!(
            decide(None, &Lookup::NotFound),
            SyncDecision::upload(SyncReason::New)
        );
    }

    #[test]
    fn unknown_remote_timestamp_always_uploads() {
        for stored in [at(0), at(23)] {
            assert_eq!(
                decide(None, &record(stored)),
                SyncDecision::upload(SyncReason::NoTimestamp)
            );
        }
    }

    #[test]
    fn strictly_newer_remote_is_updated() {
        assert_eq!(
            decide(Some(at(9)), &record(at(8))),
            SyncDecision::upload(SyncReason::Updated)
        );
    }

    #[test]
    fn equal_timestamps_are_up_to_date() {
        assert_eq!(decide(Some(at(8)), &record(at(8))), SyncDecision::skip());
    }

    #[test]
    fn older_remote_is_up_to_date() {
        assert_eq!(decide(Some(at(7)), &record(at(8))), SyncDecision::skip());
    }

    #[tokio::test]
    async fn should_upload_reads_store() {
        let store = MemoryStore::new("b");
        store.insert_at("raw/pr/pr.class", "x", at(8));

        let decision = should_upload(&store, "raw/pr/pr.class", Some(at(8)))
            .await
            .unwrap();
        assert_eq!(decision.reason, SyncReason::UpToDate);

        let decision = should_upload(&store, "raw/pr/pr.other", Some(at(8)))
            .await
            .unwrap();
        assert_eq!(decision.reason, SyncReason::New);
    }

    #[tokio::test]
    async fn should_upload_propagates_lookup_failures() {
        let store = MemoryStore::new("b");
        store.fail_key("raw/pr/pr.class");
        assert!(
            should_upload(&store, "raw/pr/pr.class", None)
                .await
                .is_err()
        );
    }
}
