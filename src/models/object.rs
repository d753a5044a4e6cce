//! Represents an object (named payload) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size and timestamps of a stored object, as returned by `stat_object`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    pub last_modified: DateTime<Utc>,
    pub creation_date: DateTime<Utc>,
    /// Payload length in bytes.
    pub size: u64,
}

/// Opaque pointer to a payload held by the external blob service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct BlobLocation(pub String);

impl BlobLocation {
    /// Last `/`-separated segment of the location, used to key tombstones.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata record the distributed backend stores under each object key.
///
/// The payload itself lives in the blob service at `blob_location`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub creation_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub blob_location: BlobLocation,
    pub size: u64,
    /// Hex MD5 of the payload at write time.
    pub etag: String,
}

impl ObjectRecord {
    pub fn stat(&self) -> ObjectStat {
        ObjectStat {
            last_modified: self.last_modified,
            creation_date: self.creation_date,
            size: self.size,
        }
    }
}

/// Result of a successful `write_object`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Hex MD5 of the payload, independent of where it was stored.
    pub etag: String,
}

/// Content hash returned to clients as the object's ETag.
pub fn compute_etag(payload: &[u8]) -> String {
    format!("{:x}", md5::compute(payload))
}
