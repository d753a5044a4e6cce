//! Tombstones: superseded blob locations kept for deferred reclamation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::object::BlobLocation;

/// Written by the distributed backend whenever an object's blob is
/// superseded (overwrite) or orphaned (delete). Never written on a first
/// write.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tombstone {
    pub deletion_date: DateTime<Utc>,
    pub blob_location: BlobLocation,
    pub from_bucket: String,
    pub key: String,
}

impl Tombstone {
    pub fn new(bucket: &str, key: &str, blob_location: BlobLocation) -> Self {
        Self {
            deletion_date: Utc::now(),
            blob_location,
            from_bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Key under which the tombstone is stored in the tombstone namespace.
    pub fn record_key(&self) -> &str {
        self.blob_location.file_name()
    }
}
