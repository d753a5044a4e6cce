//! Storage abstraction: the contract every backend implements.
//!
//! Handlers only ever talk to `dyn ObjectStorage`. Two implementations
//! exist — [`fs::LocalFsBackend`] (bucket = directory, object = file) and
//! [`distributed::DistributedBackend`] (metadata in a key-value store,
//! payloads in an external blob service) — and both share the listing
//! engine in [`listing`], so pagination behaves identically regardless of
//! where objects live.
//!
//! No operation caches state between calls: each one re-reads the backing
//! medium, so concurrent requests never observe stale in-process data.

pub mod distributed;
pub mod fs;
pub mod listing;
pub mod naming;

use crate::{
    config::{AppConfig, BackendKind},
    models::{
        bucket::Bucket,
        listing::{ListObjectsParams, ListResult},
        object::{BlobLocation, ObjectStat, WriteOutcome},
    },
};
use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::info;

use distributed::{
    DistributedBackend, blob::HttpBlobStore, metadata::MetadataStore, riak::RiakMetadataStore,
    sqlite::SqliteMetadataStore,
};
use fs::LocalFsBackend;

/// Caller-visible failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotEmpty,
    BackendUnavailable,
    InvalidArgument,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object key `{key}` invalid: {reason}")]
    InvalidObjectKey { key: String, reason: &'static str },
    #[error("storage medium timed out: {0}")]
    Timeout(String),
    #[error("record `{namespace}/{key}` is corrupt: {source}")]
    CorruptRecord {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("blob `{0}` referenced by metadata is missing")]
    MissingBlob(BlobLocation),
    #[error("{service} answered {operation} with status {status}")]
    UnexpectedStatus {
        service: &'static str,
        operation: &'static str,
        status: u16,
    },
    #[error("{service} response to {operation} is malformed: {detail}")]
    MalformedResponse {
        service: &'static str,
        operation: &'static str,
        detail: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Http(reqwest::Error),
}

impl StorageError {
    /// Map this error onto the caller-visible taxonomy.
    ///
    /// Everything that is not a domain condition means the storage medium
    /// failed us, and is reported as `BackendUnavailable` so the caller can
    /// decide whether to retry.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. } => {
                ErrorKind::NotFound
            }
            StorageError::BucketAlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::BucketNotEmpty(_) => ErrorKind::NotEmpty,
            StorageError::InvalidBucketName { .. } | StorageError::InvalidObjectKey { .. } => {
                ErrorKind::InvalidArgument
            }
            StorageError::Timeout(_)
            | StorageError::CorruptRecord { .. }
            | StorageError::MissingBlob(_)
            | StorageError::UnexpectedStatus { .. }
            | StorageError::MalformedResponse { .. }
            | StorageError::Io(_)
            | StorageError::Sqlx(_)
            | StorageError::Http(_) => ErrorKind::BackendUnavailable,
        }
    }

    fn object_not_found(bucket: &str, key: &str) -> Self {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StorageError::Timeout("metadata store pool".into()),
            other => StorageError::Sqlx(other),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let target = err
                .url()
                .map(|url| url.to_string())
                .unwrap_or_else(|| "http request".into());
            StorageError::Timeout(target)
        } else {
            StorageError::Http(err)
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The operations every storage backend provides.
///
/// Existence checks (`bucket_exists`, `object_exists`) answer `false` for
/// names that fail validation; they only error when the medium itself is
/// unreachable. Mutations validate names and fail with `InvalidArgument`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Short backend identifier used in logs and health output.
    fn name(&self) -> &'static str;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// All buckets, sorted by name.
    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>>;

    async fn create_bucket(&self, bucket: &str) -> StorageResult<Bucket>;

    /// Remove an empty bucket. Fails with `BucketNotEmpty` while objects remain.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Raw key enumeration for an existing bucket, in any order and possibly
    /// including reserved internal keys. The listing engine filters and
    /// orders it.
    async fn object_keys(&self, bucket: &str) -> StorageResult<Vec<String>>;

    /// One page of keys following marker/prefix pagination rules.
    async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StorageResult<ListResult> {
        listing::list_objects(self, bucket, params).await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat>;

    async fn read_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Store `payload` under `key`, replacing any previous object.
    ///
    /// There is no compare-and-swap: when two writers race on one key the
    /// last metadata write wins and the other write is silently discarded.
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
    ) -> StorageResult<WriteOutcome>;

    /// Remove an object. Returns whether it existed; absent objects are not
    /// an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Cheap round trip against the backing medium for readiness checks.
    async fn health_check(&self) -> StorageResult<()>;

    /// Wait for background work (best-effort cleanups) to finish.
    async fn shutdown(&self) {}
}

/// Resolve the configured backend once at startup.
pub async fn build_backend(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    let storage: Arc<dyn ObjectStorage> = match cfg.backend {
        BackendKind::Fs => Arc::new(
            LocalFsBackend::init(&cfg.storage_dir, cfg.bucket_depth)
                .await
                .with_context(|| format!("initializing storage root {}", cfg.storage_dir))?,
        ),
        BackendKind::Distributed => {
            let timeout = cfg.backend_timeout();
            let metadata: Arc<dyn MetadataStore> = if cfg.metadata_url.starts_with("sqlite:") {
                Arc::new(
                    SqliteMetadataStore::connect(&cfg.metadata_url, timeout)
                        .await
                        .with_context(|| format!("connecting to {}", cfg.metadata_url))?,
                )
            } else if cfg.metadata_url.starts_with("http://")
                || cfg.metadata_url.starts_with("https://")
            {
                Arc::new(RiakMetadataStore::new(&cfg.metadata_url, timeout)?)
            } else {
                bail!(
                    "unsupported metadata url `{}` (expected sqlite: or http(s)://)",
                    cfg.metadata_url
                );
            };
            let blobs = Arc::new(HttpBlobStore::new(&cfg.blob_url, timeout)?);
            Arc::new(DistributedBackend::new(metadata, blobs))
        }
    };

    info!("Using {} storage backend", storage.name());
    Ok(storage)
}
