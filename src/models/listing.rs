//! Parameters and results of a paginated object listing.

use chrono::{DateTime, Utc};

/// Default page size when the caller does not send `max-keys`.
pub const DEFAULT_MAX_KEYS: usize = 50_000;

/// What the caller asked for.
///
/// Empty `marker`/`prefix` mean "no cursor" and "no filter".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListObjectsParams {
    /// Only keys strictly greater than this are returned.
    pub marker: String,
    /// Only keys starting with this are returned.
    pub prefix: String,
    pub max_keys: usize,
    /// Skip per-object size/timestamp lookups.
    pub terse: bool,
}

impl Default for ListObjectsParams {
    fn default() -> Self {
        Self {
            marker: String::new(),
            prefix: String::new(),
            max_keys: DEFAULT_MAX_KEYS,
            terse: false,
        }
    }
}

/// One listed key. Size and timestamp are absent in terse listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

/// One page of a bucket listing.
///
/// `contents` is ordered by key and never longer than `max_keys`;
/// `marker` is the last returned key so it can be passed back to fetch the
/// next page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListResult {
    pub bucket_name: String,
    pub prefix: String,
    pub marker: String,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<ListEntry>,
}

impl ListResult {
    pub fn keys(&self) -> Vec<&str> {
        self.contents.iter().map(|entry| entry.key.as_str()).collect()
    }
}
