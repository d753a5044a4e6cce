//! Represents a logical bucket — a top-level container for objects.

use chrono::{DateTime, Utc};

/// A storage bucket.
///
/// Buckets are created and destroyed only through the storage backend; the
/// name doubles as a directory name (filesystem backend) or as a metadata
/// namespace (distributed backend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name (conforms to DNS naming rules).
    pub name: String,

    /// When this bucket was created.
    pub creation_date: DateTime<Utc>,
}
