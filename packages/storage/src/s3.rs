//! `aws-sdk-s3` implementation of [`ObjectStore`].
//!
//! Credentials and region come from the standard AWS provider chain
//! (`AWS_ACCESS_KEY_ID`, `AWS_PROFILE`, instance roles, ...). An optional
//! endpoint override switches to path-style addressing for S3-compatible
//! services such as R2 or `MinIO`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::config::StalledStreamProtectionConfig;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use chrono::{DateTime, Utc};
use futures::StreamExt as _;

use crate::{
    BoxError, ByteChunkStream, Lookup, Metadata, ObjectRecord, ObjectStore, StorageError,
};

/// Size of each multipart upload part, and the threshold above which a
/// streamed upload switches from a single `PutObject` to multipart.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-backed object store scoped to one bucket.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Creates a store from the default AWS configuration chain.
    pub async fn from_env(bucket: &str, endpoint_url: Option<&str>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(aws_sdk_s3::Client::from_conf(builder.build()), bucket)
    }

    /// Wraps an already-configured SDK client.
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    fn put_error(&self, key: &str, source: impl Into<BoxError>) -> StorageError {
        StorageError::Put {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    async fn create_multipart(&self, key: &str, metadata: &Metadata) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(Some(to_sdk_metadata(metadata)))
            .send()
            .await
            .map_err(|e| self.put_error(key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| self.put_error(key, "multipart upload returned no upload id"))
    }

    /// Uploads the already-buffered first part plus the rest of `stream` as
    /// parts of `upload_id`, then completes the upload.
    async fn stream_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut stream: ByteChunkStream,
        mut buffer: Vec<u8>,
    ) -> Result<u64, StorageError> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut total: u64 = 0;
        let mut ended = false;

        loop {
            let body = std::mem::replace(&mut buffer, Vec::with_capacity(PART_SIZE));
            total += body.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| self.put_error(key, e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            log::debug!("  part {part_number} of {key} uploaded ({total} bytes so far)");

            if ended {
                break;
            }
            ended = fill_part(&mut stream, &mut buffer)
                .await
                .map_err(|e| self.stream_error(key, e))?;
            if buffer.is_empty() {
                break;
            }
            part_number += 1;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| self.put_error(key, e))?;

        Ok(total)
    }

    fn stream_error(&self, key: &str, source: BoxError) -> StorageError {
        StorageError::Stream {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Lookup<Vec<u8>>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return Ok(Lookup::NotFound);
                }
                return Err(StorageError::Get {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    source: Box::new(err),
                });
            }
        };

        let bytes = output.body.collect().await.map_err(|e| StorageError::Get {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: Box::new(e),
        })?;

        Ok(Lookup::Found(bytes.into_bytes().to_vec()))
    }

    async fn head(&self, key: &str) -> Result<Lookup<ObjectRecord>, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                #[allow(clippy::cast_sign_loss)] // S3 content-length is non-negative
                let size = output.content_length().unwrap_or(0) as u64;
                let metadata = output
                    .metadata()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                Ok(Lookup::Found(ObjectRecord {
                    key: key.to_string(),
                    last_modified: to_chrono(output.last_modified()),
                    size,
                    metadata,
                }))
            }
            Err(err) => {
                // NotFound is not an error, it means the object doesn't exist
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(Lookup::NotFound);
                }
                Err(StorageError::Head {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &Metadata,
        content_type: &str,
    ) -> Result<(), StorageError> {
        #[allow(clippy::cast_precision_loss)] // display-only KB value
        let kb = body.len() as f64 / 1024.0;
        log::info!("Putting s3://{}/{key} ({kb:.1} KB)", self.bucket);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(to_sdk_metadata(metadata)))
            .send()
            .await
            .map_err(|e| self.put_error(key, e))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRecord>, StorageError> {
        log::debug!("Listing s3://{}/{prefix}*", self.bucket);

        let mut records = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| StorageError::List {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    #[allow(clippy::cast_sign_loss)]
                    let size = obj.size().unwrap_or(0) as u64;
                    records.push(ObjectRecord {
                        key: key.to_string(),
                        last_modified: to_chrono(obj.last_modified()),
                        size,
                        metadata: Metadata::new(),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::debug!("  found {} objects", records.len());
        Ok(records)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, from))
            .key(to)
            .send()
            .await
            .map_err(|e| StorageError::Copy {
                bucket: self.bucket.clone(),
                from: from.to_string(),
                to: to.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut stream: ByteChunkStream,
        metadata: &Metadata,
    ) -> Result<u64, StorageError> {
        let mut buffer = Vec::with_capacity(PART_SIZE);
        let ended = fill_part(&mut stream, &mut buffer)
            .await
            .map_err(|e| self.stream_error(key, e))?;

        // Small payloads fit in one part; skip the multipart handshake.
        if ended {
            let size = buffer.len() as u64;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(buffer))
                .set_metadata(Some(to_sdk_metadata(metadata)))
                .send()
                .await
                .map_err(|e| self.put_error(key, e))?;
            return Ok(size);
        }

        let upload_id = self.create_multipart(key, metadata).await?;

        match self.stream_parts(key, &upload_id, stream, buffer).await {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    log::warn!("Failed to abort multipart upload of {key}: {abort_err}");
                }
                Err(e)
            }
        }
    }
}

/// Appends chunks from `stream` to `buffer` until it holds at least
/// [`PART_SIZE`] bytes. Returns `true` once the stream is exhausted.
async fn fill_part(stream: &mut ByteChunkStream, buffer: &mut Vec<u8>) -> Result<bool, BoxError> {
    while buffer.len() < PART_SIZE {
        match stream.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

/// `CopyObject` source header value: `bucket/key` with each key segment
/// percent-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    format!("{bucket}/{key}")
}

fn to_sdk_metadata(metadata: &Metadata) -> HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Converts an SDK timestamp. A missing timestamp maps to the Unix epoch so
/// that any known remote timestamp compares as newer.
fn to_chrono(value: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::{StreamExt as _, stream};

    use super::*;

    fn chunks(sizes: &[usize]) -> ByteChunkStream {
        let items: Vec<Result<Bytes, BoxError>> = sizes
            .iter()
            .map(|&n| Ok(Bytes::from(vec![7u8; n])))
            .collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn fill_part_reports_exhaustion_for_small_payloads() {
        let mut stream = chunks(&[10, 20]);
        let mut buffer = Vec::new();
        assert!(fill_part(&mut stream, &mut buffer).await.unwrap());
        assert_eq!(buffer.len(), 30);
    }

    #[tokio::test]
    async fn fill_part_stops_at_part_size() {
        let mut stream = chunks(&[PART_SIZE / 2, PART_SIZE / 2, 5]);
        let mut buffer = Vec::new();
        assert!(!fill_part(&mut stream, &mut buffer).await.unwrap());
        assert_eq!(buffer.len(), PART_SIZE);

        buffer.clear();
        assert!(fill_part(&mut stream, &mut buffer).await.unwrap());
        assert_eq!(buffer.len(), 5);
    }

    #[tokio::test]
    async fn fill_part_propagates_stream_errors() {
        let items: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"ab")), Err("connection reset".into())];
        let mut stream = stream::iter(items).boxed();
        let mut buffer = Vec::new();
        assert!(fill_part(&mut stream, &mut buffer).await.is_err());
    }

    #[test]
    fn copy_source_encodes_key_segments() {
        assert_eq!(copy_source("b", "raw/pr/pr.class"), "b/raw/pr/pr.class");
        assert_eq!(
            copy_source("b", "raw/pr/a b+\u{fc}.txt"),
            "b/raw/pr/a%20b%2B%C3%BC.txt"
        );
    }

    #[test]
    fn converts_sdk_timestamps() {
        let sdk = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(Some(&sdk)).timestamp(), 1_700_000_000);
        assert_eq!(to_chrono(None), DateTime::<Utc>::default());
    }
}
