//! In-memory [`ObjectStore`].
//!
//! Objects live in a sorted map, so listings come back in key order the way
//! S3 returns them. Individual keys can be marked as failing to exercise
//! error paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt as _;

use crate::{ByteChunkStream, Lookup, Metadata, ObjectRecord, ObjectStore, StorageError};

/// A stored object and its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object body.
    pub body: Vec<u8>,
    /// Last-modified timestamp.
    pub last_modified: DateTime<Utc>,
    /// User metadata.
    pub metadata: Metadata,
    /// Content type, if one was supplied.
    pub content_type: Option<String>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    failing_keys: BTreeSet<String>,
    failing_prefixes: BTreeSet<String>,
}

/// Object store held entirely in process memory.
pub struct MemoryStore {
    bucket: String,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store for `bucket`.
    #[must_use]
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-write;
        // the map itself is still usable.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Inserts an object with an explicit last-modified timestamp.
    pub fn insert_at(&self, key: &str, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                last_modified,
                metadata: Metadata::new(),
                content_type: None,
            },
        );
    }

    /// Makes every operation touching `key` fail.
    pub fn fail_key(&self, key: &str) {
        self.state().failing_keys.insert(key.to_string());
    }

    /// Makes listing `prefix` fail.
    pub fn fail_listing(&self, prefix: &str) {
        self.state().failing_prefixes.insert(prefix.to_string());
    }

    /// Returns a copy of the object at `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.state().objects.get(key).cloned()
    }

    /// Returns every stored key in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    fn check(&self, key: &str) -> Result<(), String> {
        if self.state().failing_keys.contains(key) {
            Err(format!("injected failure for {key}"))
        } else {
            Ok(())
        }
    }

    fn store(&self, key: &str, body: Vec<u8>, metadata: &Metadata, content_type: Option<&str>) {
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
                metadata: metadata.clone(),
                content_type: content_type.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Lookup<Vec<u8>>, StorageError> {
        self.check(key).map_err(|e| StorageError::Get {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;
        Ok(self.object(key).map(|o| o.body).into())
    }

    async fn head(&self, key: &str) -> Result<Lookup<ObjectRecord>, StorageError> {
        self.check(key).map_err(|e| StorageError::Head {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;
        Ok(self
            .object(key)
            .map(|o| ObjectRecord {
                key: key.to_string(),
                last_modified: o.last_modified,
                size: o.body.len() as u64,
                metadata: o.metadata,
            })
            .into())
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &Metadata,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.check(key).map_err(|e| StorageError::Put {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;
        self.store(key, body, metadata, Some(content_type));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRecord>, StorageError> {
        let state = self.state();
        if state.failing_prefixes.contains(prefix) {
            return Err(StorageError::List {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
                source: format!("injected failure for {prefix}").into(),
            });
        }
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectRecord {
                key: k.clone(),
                last_modified: o.last_modified,
                size: o.body.len() as u64,
                metadata: Metadata::new(),
            })
            .collect())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let copy_err = |source: String| StorageError::Copy {
            bucket: self.bucket.clone(),
            from: from.to_string(),
            to: to.to_string(),
            source: source.into(),
        };
        self.check(from).map_err(copy_err)?;
        let mut object = self
            .object(from)
            .ok_or_else(|| copy_err(format!("no such key: {from}")))?;
        object.last_modified = Utc::now();
        self.state().objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check(key).map_err(|e| StorageError::Delete {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;
        self.state().objects.remove(key);
        Ok(())
    }

    async fn upload_stream(
        &self,
        key: &str,
        stream: ByteChunkStream,
        metadata: &Metadata,
    ) -> Result<u64, StorageError> {
        self.check(key).map_err(|e| StorageError::Put {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;
        let body: Vec<u8> = stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|source| StorageError::Stream {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            })?;
        let size = body.len() as u64;
        self.store(key, body, metadata, None);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::StreamExt as _;
    use futures::stream;

    use super::*;
    use crate::BoxError;

    #[tokio::test]
    async fn head_reports_not_found() {
        let store = MemoryStore::new("b");
        assert!(store.head("missing").await.unwrap().is_not_found());
    }

    #[tokio::test]
    async fn list_is_scoped_to_prefix_and_sorted() {
        let store = MemoryStore::new("b");
        let ts = Utc::now();
        store.insert_at("raw/pr/b", "2", ts);
        store.insert_at("raw/pr/a", "1", ts);
        store.insert_at("raw/other", "x", ts);

        let keys: Vec<String> = store
            .list("raw/pr/")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["raw/pr/a", "raw/pr/b"]);
    }

    #[tokio::test]
    async fn upload_stream_concatenates_chunks() {
        let store = MemoryStore::new("b");
        let items: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let mut metadata = Metadata::new();
        metadata.insert("source-url".to_string(), "https://example.com".to_string());

        let written = store
            .upload_stream("k", stream::iter(items).boxed(), &metadata)
            .await
            .unwrap();

        assert_eq!(written, 11);
        let object = store.object("k").unwrap();
        assert_eq!(object.body, b"hello world");
        assert_eq!(object.metadata, metadata);
    }

    #[tokio::test]
    async fn failed_stream_writes_nothing() {
        let store = MemoryStore::new("b");
        let items: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"partial")), Err("reset".into())];

        let err = store
            .upload_stream("k", stream::iter(items).boxed(), &Metadata::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Stream { .. }));
        assert!(store.object("k").is_none());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = MemoryStore::new("b");
        store.insert_at("k", "v", Utc::now());
        store.fail_key("k");
        assert!(matches!(store.head("k").await, Err(StorageError::Head { .. })));
        assert!(matches!(store.copy("k", "k2").await, Err(StorageError::Copy { .. })));
    }
}
