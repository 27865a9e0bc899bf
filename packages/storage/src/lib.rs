#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Object-store collaborator for the statsync pipeline.
//!
//! Every stage talks to storage through the [`ObjectStore`] trait. Two
//! implementations are provided:
//!
//! - [`s3::S3Store`] backed by `aws-sdk-s3` (AWS, R2, `MinIO`, ...)
//! - [`memory::MemoryStore`] which keeps objects in process memory, used by
//!   tests and dry runs
//!
//! A missing object is not an error: lookups return [`Lookup::NotFound`] so
//! callers branch on a typed outcome.

pub mod memory;
pub mod s3;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

/// Boxed error type used for opaque SDK and stream failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// User metadata attached to a stored object.
pub type Metadata = BTreeMap<String, String>;

/// A stream of byte chunks fed into [`ObjectStore::upload_stream`].
pub type ByteChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Get {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `PutObject` (or a multipart step) failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Put {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `HeadObject` failed for a reason other than "not found".
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `ListObjectsV2` failed.
    #[error("Failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `CopyObject` failed.
    #[error("Failed to copy s3://{bucket}/{from} to {to}: {source}")]
    Copy {
        /// Bucket name.
        bucket: String,
        /// Source key.
        from: String,
        /// Destination key.
        to: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `DeleteObject` failed.
    #[error("Failed to delete s3://{bucket}/{key}: {source}")]
    Delete {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// The byte stream feeding an upload failed mid-transfer.
    #[error("Source stream for s3://{bucket}/{key} failed: {source}")]
    Stream {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying stream error.
        source: BoxError,
    },
}

/// Outcome of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The object exists.
    Found(T),
    /// No object exists at the key.
    NotFound,
}

impl<T> Lookup<T> {
    /// Converts into an [`Option`].
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    /// Returns `true` for [`Lookup::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

/// The storage system's own record for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Full object key.
    pub key: String,
    /// Storage-assigned last-modified timestamp.
    pub last_modified: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
    /// User metadata. Empty for records produced by [`ObjectStore::list`].
    pub metadata: Metadata,
}

/// Operations the pipeline consumes from an object store.
///
/// All operations are scoped to the single bucket returned by
/// [`ObjectStore::bucket`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the bucket this store operates on.
    fn bucket(&self) -> &str;

    /// Reads an object's full body.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Get`] on any failure other than a missing key.
    async fn get(&self, key: &str) -> Result<Lookup<Vec<u8>>, StorageError>;

    /// Reads an object's metadata without its body.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Head`] on any failure other than a missing key.
    async fn head(&self, key: &str) -> Result<Lookup<ObjectRecord>, StorageError>;

    /// Writes a complete object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Put`] if the write fails.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &Metadata,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Lists every object whose key starts with `prefix`, in the order the
    /// backend returns them.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if listing fails.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRecord>, StorageError>;

    /// Copies an object within the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Copy`] if the copy fails.
    async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Deletes an object. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the delete fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Pipes a byte stream into an object without holding the whole payload
    /// in memory. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Stream`] if the source stream fails, or
    /// [`StorageError::Put`] if the destination write fails.
    async fn upload_stream(
        &self,
        key: &str,
        stream: ByteChunkStream,
        metadata: &Metadata,
    ) -> Result<u64, StorageError>;
}

/// Formats an `s3://bucket/key` location string.
#[must_use]
pub fn location(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_from_option() {
        assert_eq!(Lookup::from(Some(3)), Lookup::Found(3));
        assert!(Lookup::<u8>::from(None).is_not_found());
        assert_eq!(Lookup::Found("x").found(), Some("x"));
    }

    #[test]
    fn formats_location() {
        assert_eq!(location("b", "raw/pr/x"), "s3://b/raw/pr/x");
    }
}
