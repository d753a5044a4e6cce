//! Distributed backend: metadata in a key-value store, payloads in an
//! external blob service.
//!
//! Each bucket is a metadata namespace; the bucket exists while its
//! `__CreationDate__` key does. Every object key in the namespace maps to a
//! JSON [`ObjectRecord`] pointing at the payload's blob location.
//!
//! Writes are two-phase and not atomic: the payload is uploaded first, then
//! the record is stored. A crash in between leaks an unreferenced blob,
//! which is reclaimed out of band. When a record replaces (or a delete
//! drops) an older one, the old location is written to a [`Tombstone`] and
//! a best-effort delete of the old blob runs in the background; its outcome
//! never reaches the caller.

pub mod blob;
#[cfg(test)]
pub(crate) mod memory;
pub mod metadata;
pub mod riak;
pub mod sqlite;

use super::{
    ObjectStorage, StorageError, StorageResult,
    listing::{CREATION_MARKER_KEY, is_reserved_key},
    naming::{ensure_bucket_name_safe, ensure_key_safe},
};
use crate::models::{
    bucket::Bucket,
    object::{BlobLocation, ObjectRecord, ObjectStat, WriteOutcome, compute_etag},
    tombstone::Tombstone,
};
use async_trait::async_trait;
use blob::BlobStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metadata::MetadataStore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Namespace holding tombstones of superseded blobs.
pub const TOMBSTONE_NAMESPACE: &str = "deleted_objects";

/// Namespaces that belong to the infrastructure, never to users.
const PRIVATE_NAMESPACES: &[&str] = &["luwak_node", TOMBSTONE_NAMESPACE];

/// Value stored under `__CreationDate__`.
#[derive(Serialize, Deserialize)]
struct CreationMarker {
    creation_date: DateTime<Utc>,
}

pub struct DistributedBackend {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    /// Background blob deletions, awaited on shutdown.
    cleanup: TaskTracker,
}

impl DistributedBackend {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        info!(
            "Distributed storage with {} metadata and {} blobs",
            metadata.name(),
            blobs.name()
        );
        Self {
            metadata,
            blobs,
            cleanup: TaskTracker::new(),
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let Some(raw) = self.metadata.get(namespace, key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StorageError::CorruptRecord {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source,
            })
    }

    async fn store<T: Serialize + Sync>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let raw = serde_json::to_vec(value).map_err(|source| StorageError::CorruptRecord {
            namespace: namespace.to_string(),
            key: key.to_string(),
            source,
        })?;
        self.metadata.put(namespace, key, raw).await
    }

    async fn creation_date(&self, bucket: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let marker: Option<CreationMarker> = self.load(bucket, CREATION_MARKER_KEY).await?;
        Ok(marker.map(|m| m.creation_date))
    }

    async fn load_record(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectRecord>> {
        self.load(bucket, key).await
    }

    /// Tombstone a superseded blob and schedule its deletion.
    ///
    /// Runs after the new state is committed, so nothing here may fail the
    /// caller's operation.
    async fn retire_blob(&self, bucket: &str, key: &str, location: BlobLocation) {
        let tombstone = Tombstone::new(bucket, key, location.clone());
        if let Err(err) = self
            .store(TOMBSTONE_NAMESPACE, tombstone.record_key(), &tombstone)
            .await
        {
            warn!(
                "failed to tombstone blob {} of {}/{}: {}",
                location, bucket, key, err
            );
        }

        let blobs = Arc::clone(&self.blobs);
        self.cleanup.spawn(async move {
            match blobs.delete(&location).await {
                Ok(()) => debug!("reclaimed blob {}", location),
                Err(err) => warn!("best-effort delete of blob {} failed: {}", location, err),
            }
        });
    }

    /// Wait until every scheduled blob deletion has finished.
    pub async fn wait_for_cleanup(&self) {
        self.cleanup.close();
        self.cleanup.wait().await;
        self.cleanup.reopen();
    }

    #[cfg(test)]
    async fn tombstone(&self, location: &BlobLocation) -> StorageResult<Option<Tombstone>> {
        self.load(TOMBSTONE_NAMESPACE, location.file_name()).await
    }
}

#[async_trait]
impl ObjectStorage for DistributedBackend {
    fn name(&self) -> &'static str {
        "distributed"
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        if ensure_bucket_name_safe(bucket).is_err() {
            return Ok(false);
        }
        Ok(self.creation_date(bucket).await?.is_some())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        if ensure_bucket_name_safe(bucket).is_err() || ensure_key_safe(key).is_err() {
            return Ok(false);
        }
        Ok(self.metadata.get(bucket, key).await?.is_some())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let mut buckets = Vec::new();
        for namespace in self.metadata.list_namespaces().await? {
            if PRIVATE_NAMESPACES.contains(&namespace.as_str()) {
                continue;
            }
            if let Some(creation_date) = self.creation_date(&namespace).await? {
                buckets.push(Bucket {
                    name: namespace,
                    creation_date,
                });
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        ensure_bucket_name_safe(bucket)?;
        if self.creation_date(bucket).await?.is_some() {
            return Err(StorageError::BucketAlreadyExists(bucket.to_string()));
        }
        let marker = CreationMarker {
            creation_date: Utc::now(),
        };
        self.store(bucket, CREATION_MARKER_KEY, &marker).await?;
        info!("Created bucket {}", bucket);
        Ok(Bucket {
            name: bucket.to_string(),
            creation_date: marker.creation_date,
        })
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        ensure_bucket_name_safe(bucket)?;
        if self.creation_date(bucket).await?.is_none() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let keys = self.metadata.list_keys(bucket).await?;
        if keys.iter().any(|key| !is_reserved_key(key)) {
            return Err(StorageError::BucketNotEmpty(bucket.to_string()));
        }
        self.metadata.delete(bucket, CREATION_MARKER_KEY).await?;
        info!("Removed bucket {}", bucket);
        Ok(())
    }

    async fn object_keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        ensure_bucket_name_safe(bucket)?;
        self.metadata.list_keys(bucket).await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        debug!("Stating object {} from bucket {}", key, bucket);
        self.load_record(bucket, key)
            .await?
            .map(|record| record.stat())
            .ok_or_else(|| StorageError::object_not_found(bucket, key))
    }

    async fn read_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        let record = self
            .load_record(bucket, key)
            .await?
            .ok_or_else(|| StorageError::object_not_found(bucket, key))?;
        self.blobs.fetch(&record.blob_location).await
    }

    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
    ) -> StorageResult<WriteOutcome> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        if self.creation_date(bucket).await?.is_none() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let previous = self.load_record(bucket, key).await?;
        let etag = compute_etag(&payload);
        let size = payload.len() as u64;

        let blob_location = self.blobs.upload(payload).await?;
        debug!("Object location on blob service {}", blob_location);

        let now = Utc::now();
        let record = ObjectRecord {
            creation_date: previous.as_ref().map_or(now, |p| p.creation_date),
            last_modified: now,
            blob_location: blob_location.clone(),
            size,
            etag: etag.clone(),
        };
        if let Err(err) = self.store(bucket, key, &record).await {
            warn!(
                "metadata write for {}/{} failed, blob {} is orphaned",
                bucket, key, blob_location
            );
            return Err(err);
        }
        info!("Created object {} on bucket {} ({} bytes)", key, bucket, size);

        if let Some(previous) = previous {
            if previous.blob_location != blob_location {
                debug!(
                    "Old object location from bucket {} is {}",
                    bucket, previous.blob_location
                );
                self.retire_blob(bucket, key, previous.blob_location).await;
            }
        }

        Ok(WriteOutcome { etag })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        if ensure_bucket_name_safe(bucket).is_err() || ensure_key_safe(key).is_err() {
            return Ok(false);
        }
        let Some(record) = self.load_record(bucket, key).await? else {
            return Ok(false);
        };
        if !self.metadata.delete(bucket, key).await? {
            return Ok(false);
        }
        info!(
            "Deleted object {} from bucket {} on {}",
            key, bucket, record.blob_location
        );
        self.retire_blob(bucket, key, record.blob_location).await;
        Ok(true)
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.metadata.ping().await?;
        self.blobs.ping().await
    }

    async fn shutdown(&self) {
        self.wait_for_cleanup().await;
    }
}
