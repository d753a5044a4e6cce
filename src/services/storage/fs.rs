//! Local filesystem backend.
//!
//! Buckets are directories under `root`, objects are files inside them,
//! optionally sharded beneath `root/{bucket}/{h0}/…/{h(d-1)}/{name}` where
//! `hi` is byte `i` of `md5(key)` in hex. The key is stored as one escaped
//! file name (`/` and `%` percent-encoded), so `a` and `a/b` coexist just
//! as they do in a key-value store. Payloads are staged under
//! `root/.staging` and renamed into place so readers never see a partial
//! file.

use super::{
    ObjectStorage, StorageError, StorageResult,
    naming::{ensure_bucket_name_safe, ensure_key_safe},
};
use crate::models::{
    bucket::Bucket,
    object::{ObjectStat, WriteOutcome, compute_etag},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Directory under the root holding in-flight uploads. Bucket names cannot
/// start with a dot, so it never shows up as a bucket.
const STAGING_DIR: &str = ".staging";

/// Deepest shard nesting accepted from configuration.
pub const MAX_BUCKET_DEPTH: usize = 8;

/// Longest escaped run stored in a single path component.
const NAME_CHUNK_BYTES: usize = 200;

/// Suffix of directories holding the continuation of a long key. Escaped
/// names never end in `%`, so these never collide with object files.
const CONTINUATION: char = '%';

pub struct LocalFsBackend {
    root: PathBuf,
    bucket_depth: usize,
}

impl LocalFsBackend {
    /// Open (creating if needed) a storage root.
    pub async fn init(root: impl Into<PathBuf>, bucket_depth: usize) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        if bucket_depth > MAX_BUCKET_DEPTH {
            warn!(
                "bucket depth {} exceeds {}, clamping",
                bucket_depth, MAX_BUCKET_DEPTH
            );
        }
        let bucket_depth = bucket_depth.min(MAX_BUCKET_DEPTH);
        info!(
            "Filesystem storage at {} (bucket depth {})",
            root.display(),
            bucket_depth
        );
        Ok(Self { root, bucket_depth })
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Shard directory names for a key: the first `bucket_depth` bytes of
    /// `md5(key)` as lowercase hex.
    fn object_shards(&self, key: &str) -> Vec<String> {
        let digest = md5::compute(key.as_bytes());
        digest
            .iter()
            .take(self.bucket_depth)
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }

    /// Full payload path. Parent directories may not exist yet.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_root(bucket);
        for shard in self.object_shards(key) {
            path.push(shard);
        }
        for component in key_components(key) {
            path.push(component);
        }
        path
    }

    /// Create the directories between the bucket root and an object file,
    /// one level at a time. The bucket root itself is never created, so a
    /// write racing a bucket deletion fails instead of reviving the bucket.
    async fn create_object_dirs(&self, bucket: &str, dir: &Path) -> StorageResult<()> {
        let mut current = self.bucket_root(bucket);
        let Ok(relative) = dir.strip_prefix(&current) else {
            return Ok(());
        };
        let relative = relative.to_path_buf();
        for component in relative.components() {
            current.push(component);
            match fs::create_dir(&current).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) if is_missing(&err) => {
                    return Err(StorageError::BucketNotFound(bucket.to_string()));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Metadata of `path`, `None` when it does not exist.
    async fn metadata(path: &Path) -> StorageResult<Option<std::fs::Metadata>> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(err) if is_missing(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Metadata of an object file, `ObjectNotFound` if absent or a directory.
    async fn object_metadata(&self, bucket: &str, key: &str) -> StorageResult<std::fs::Metadata> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        match Self::metadata(&self.object_path(bucket, key)).await? {
            Some(meta) if meta.is_file() => Ok(meta),
            _ => Err(StorageError::object_not_found(bucket, key)),
        }
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalFsBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        if ensure_bucket_name_safe(bucket).is_err() {
            return Ok(false);
        }
        Ok(Self::metadata(&self.bucket_root(bucket))
            .await?
            .is_some_and(|meta| meta.is_dir()))
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.object_metadata(bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if is_absent(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let mut buckets = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || ensure_bucket_name_safe(&name).is_err() {
                debug!("ignoring non-bucket entry {}", name);
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // Removed while we were listing.
                Err(err) if is_missing(&err) => continue,
                Err(err) => return Err(err.into()),
            };
            if !meta.is_dir() {
                continue;
            }
            buckets.push(Bucket {
                name,
                creation_date: created_at(&meta)?,
            });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        ensure_bucket_name_safe(bucket)?;
        let path = self.bucket_root(bucket);
        match fs::create_dir(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::BucketAlreadyExists(bucket.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        let meta = fs::metadata(&path).await?;
        info!("Created bucket {}", bucket);
        Ok(Bucket {
            name: bucket.to_string(),
            creation_date: created_at(&meta)?,
        })
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        ensure_bucket_name_safe(bucket)?;
        if !self.bucket_exists(bucket).await? {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        // Only directories are removed: a file anywhere in the tree means
        // the bucket still holds an object and the walk stops there.
        let root = self.bucket_root(bucket);
        let emptied = tokio::task::spawn_blocking(move || remove_empty_tree(&root))
            .await
            .map_err(io::Error::other)??;
        if !emptied {
            return Err(StorageError::BucketNotEmpty(bucket.to_string()));
        }

        info!("Deleted bucket {}", bucket);
        Ok(())
    }

    async fn object_keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        if Self::metadata(&root).await?.is_none() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let depth = self.bucket_depth;
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root, depth))
            .await
            .map_err(io::Error::other)??;
        Ok(keys)
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        let meta = self.object_metadata(bucket, key).await?;
        let last_modified = DateTime::<Utc>::from(meta.modified()?);
        let creation_date = meta
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(last_modified);
        Ok(ObjectStat {
            last_modified,
            creation_date,
            size: meta.len(),
        })
    }

    async fn read_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        let path = self.object_path(bucket, key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if is_missing(&err) => Err(StorageError::object_not_found(bucket, key)),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
    ) -> StorageResult<WriteOutcome> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        if !self.bucket_exists(bucket).await? {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let file_path = self.object_path(bucket, key);
        let tmp_path = self.root.join(STAGING_DIR).join(Uuid::new_v4().to_string());
        if let Err(err) = stage_payload(&tmp_path, &payload).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let placed = match file_path.parent() {
                Some(parent) => self.create_object_dirs(bucket, parent).await,
                None => Ok(()),
            };
            let err = match placed {
                Ok(()) => match fs::rename(&tmp_path, &file_path).await {
                    Ok(()) => break,
                    Err(err) => err,
                },
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err);
                }
            };
            // A concurrent delete may have pruned the shard directories
            // between creating them and the rename.
            let retry = is_missing(&err)
                && attempt < 3
                && matches!(self.bucket_exists(bucket).await, Ok(true));
            if retry {
                debug!("retrying placement of {}/{}", bucket, key);
                continue;
            }
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if is_missing(&err) {
                StorageError::BucketNotFound(bucket.to_string())
            } else {
                err.into()
            });
        }

        info!(
            "Created object {} on bucket {} ({} bytes)",
            key,
            bucket,
            payload.len()
        );
        Ok(WriteOutcome {
            etag: compute_etag(&payload),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        if ensure_bucket_name_safe(bucket).is_err() || ensure_key_safe(key).is_err() {
            return Ok(false);
        }
        let file_path = self.object_path(bucket, key);
        if !Self::metadata(&file_path)
            .await?
            .is_some_and(|meta| meta.is_file())
        {
            return Ok(false);
        }

        match fs::remove_file(&file_path).await {
            Ok(()) => debug!("removed physical file {}", file_path.display()),
            Err(err) if is_missing(&err) => {
                debug!("file {} already missing", file_path.display());
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket))
                .await;
        }
        info!("Deleted object {} from bucket {}", key, bucket);
        Ok(true)
    }

    /// Write, read back and remove a scratch file under the staging directory.
    async fn health_check(&self) -> StorageResult<()> {
        let scratch = self
            .root
            .join(STAGING_DIR)
            .join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&scratch, b"readyz").await?;
        let read_back = fs::read(&scratch).await;
        let _ = fs::remove_file(&scratch).await;
        if read_back? != b"readyz" {
            return Err(io::Error::other("scratch file content mismatch").into());
        }
        Ok(())
    }
}

/// Write and fsync a payload to its staging path.
async fn stage_payload(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn is_absent(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::ObjectNotFound { .. }
            | StorageError::InvalidBucketName { .. }
            | StorageError::InvalidObjectKey { .. }
    )
}

/// Best available creation time, falling back to the modification time on
/// filesystems that do not record birth times.
fn created_at(meta: &std::fs::Metadata) -> io::Result<DateTime<Utc>> {
    match meta.created() {
        Ok(created) => Ok(created.into()),
        Err(_) => Ok(meta.modified()?.into()),
    }
}

/// Walk a bucket directory and rebuild object keys from file paths,
/// dropping the leading shard directories.
fn walk_keys(bucket_root: &Path, depth: usize) -> io::Result<Vec<String>> {
    let mut keys = Vec::new();
    for entry in WalkDir::new(bucket_root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let io_err = io::Error::from(err);
                // Concurrent deletes can remove entries mid-walk.
                if is_missing(&io_err) {
                    continue;
                }
                return Err(io_err);
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(bucket_root) else {
            continue;
        };
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|component| match component {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        let Some(segments) = segments else {
            warn!("ignoring non UTF-8 path {}", entry.path().display());
            continue;
        };
        match segments.get(depth..).and_then(key_from_components) {
            Some(key) => keys.push(key),
            None => debug!("ignoring stray file {}", entry.path().display()),
        }
    }
    Ok(keys)
}

/// Escape a key into a single file name.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            other => encoded.push(other),
        }
    }
    encoded
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Path components of a key below its shard directories.
///
/// Short keys are one file name. Longer ones are cut into chunks that fit
/// filesystem name limits; every chunk but the last is a directory name
/// ending in [`CONTINUATION`].
fn key_components(key: &str) -> Vec<String> {
    let encoded = encode_key(key);
    let mut components = Vec::new();
    let mut rest = encoded.as_str();
    while rest.len() > NAME_CHUNK_BYTES {
        let mut cut = NAME_CHUNK_BYTES;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        components.push(format!("{}{}", head, CONTINUATION));
        rest = tail;
    }
    // `.` and `..` cannot be file names.
    components.push(match rest {
        "." | ".." => format!("%2E{}", &rest[1..]),
        _ => rest.to_string(),
    });
    components
}

/// Inverse of [`key_components`]; `None` for paths it never produces.
fn key_from_components(components: &[&str]) -> Option<String> {
    let (file, dirs) = components.split_last()?;
    if file.ends_with(CONTINUATION) {
        return None;
    }
    let mut encoded = String::new();
    for dir in dirs {
        encoded.push_str(dir.strip_suffix(CONTINUATION)?);
    }
    encoded.push_str(file);
    decode_key(&encoded)
}

/// Remove every directory under (and including) `root`, deepest first.
/// Returns `false` without touching anything further as soon as a file is
/// found.
fn remove_empty_tree(root: &Path) -> io::Result<bool> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_dir() {
            return Ok(false);
        }
        match std::fs::remove_dir(entry.path()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => return Ok(false),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
