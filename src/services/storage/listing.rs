//! Marker/prefix pagination shared by all backends.
//!
//! Backends only enumerate raw keys (`ObjectStorage::object_keys`); this
//! module filters internal keys, orders them, seeks past the marker and to
//! the prefix, cuts the page and, unless the listing is terse, fetches
//! per-object metadata.

use super::{ObjectStorage, StorageError, StorageResult, naming::ensure_bucket_name_safe};
use crate::models::{
    listing::{ListEntry, ListObjectsParams, ListResult},
    object::ObjectStat,
};
use futures::{StreamExt, stream};
use tracing::debug;

/// Key marking a bucket as created in the distributed backend.
pub const CREATION_MARKER_KEY: &str = "__CreationDate__";

/// Keys that are bookkeeping, never objects.
const RESERVED_KEYS: &[&str] = &[CREATION_MARKER_KEY];

/// How many `stat_object` calls a non-terse listing keeps in flight.
const STAT_CONCURRENCY: usize = 16;

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Keys selected for one page.
#[derive(Debug, PartialEq, Eq)]
pub struct Page {
    pub keys: Vec<String>,
    pub is_truncated: bool,
}

/// Select one page out of a raw key enumeration.
///
/// Keys are ordered bytewise. A non-empty `marker` starts the page after
/// the last key `<= marker`; a non-empty `prefix` then seeks to the first
/// key `>= prefix` and stops at the first key that no longer starts with
/// it. An empty prefix matches everything, so the stop rule only applies
/// when a prefix was given.
pub fn paginate(mut keys: Vec<String>, marker: &str, prefix: &str, max_keys: usize) -> Page {
    keys.retain(|key| !is_reserved_key(key));
    keys.sort_unstable();
    keys.dedup();

    let mut start = 0;
    if !marker.is_empty() {
        start = keys.partition_point(|key| key.as_str() <= marker);
    }
    if !prefix.is_empty() {
        start += keys[start..].partition_point(|key| key.as_str() < prefix);
    }

    let mut page = Vec::new();
    let mut is_truncated = false;
    for key in keys.into_iter().skip(start) {
        if !prefix.is_empty() && !key.starts_with(prefix) {
            break;
        }
        if page.len() >= max_keys {
            is_truncated = true;
            break;
        }
        page.push(key);
    }

    Page {
        keys: page,
        is_truncated,
    }
}

/// List one page of `bucket` on any backend.
pub async fn list_objects<S>(
    storage: &S,
    bucket: &str,
    params: &ListObjectsParams,
) -> StorageResult<ListResult>
where
    S: ObjectStorage + ?Sized,
{
    ensure_bucket_name_safe(bucket)?;
    if !storage.bucket_exists(bucket).await? {
        return Err(StorageError::BucketNotFound(bucket.to_string()));
    }

    let keys = storage.object_keys(bucket).await?;
    let scanned = keys.len();
    let page = paginate(keys, &params.marker, &params.prefix, params.max_keys);
    let marker = page
        .keys
        .last()
        .cloned()
        .unwrap_or_else(|| params.marker.clone());

    let contents = if params.terse {
        page.keys
            .into_iter()
            .map(|key| ListEntry {
                key,
                last_modified: None,
                size: None,
            })
            .collect()
    } else {
        let stats: Vec<(String, StorageResult<ObjectStat>)> = stream::iter(page.keys)
            .map(|key| async move {
                let stat = storage.stat_object(bucket, &key).await;
                (key, stat)
            })
            .buffered(STAT_CONCURRENCY)
            .collect()
            .await;

        let mut contents = Vec::with_capacity(stats.len());
        for (key, stat) in stats {
            match stat {
                Ok(stat) => contents.push(ListEntry {
                    key,
                    last_modified: Some(stat.last_modified),
                    size: Some(stat.size),
                }),
                // Deleted between enumeration and stat.
                Err(StorageError::ObjectNotFound { .. }) => {
                    debug!("skipping vanished object {} in bucket {}", key, bucket);
                }
                Err(err) => return Err(err),
            }
        }
        contents
    };

    debug!(
        "listed {} of {} keys from bucket {} (marker={:?}, prefix={:?}, truncated={})",
        contents.len(),
        scanned,
        bucket,
        params.marker,
        params.prefix,
        page.is_truncated
    );

    Ok(ListResult {
        bucket_name: bucket.to_string(),
        prefix: params.prefix.clone(),
        marker,
        max_keys: params.max_keys,
        is_truncated: page.is_truncated,
        contents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn first_page_is_truncated_and_second_is_not() {
        let all = keys(&["c.jpg", "a.jpg", "b.jpg"]);

        let first = paginate(all.clone(), "", "", 2);
        assert_eq!(first.keys, keys(&["a.jpg", "b.jpg"]));
        assert!(first.is_truncated);

        let second = paginate(all, "b.jpg", "", 2);
        assert_eq!(second.keys, keys(&["c.jpg"]));
        assert!(!second.is_truncated);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let page = paginate(keys(&["a", "b"]), "", "", 2);
        assert_eq!(page.keys.len(), 2);
        assert!(!page.is_truncated);
    }

    #[test]
    fn marker_is_exclusive_even_when_absent_from_keys() {
        let all = keys(&["a", "b", "c", "d"]);
        assert_eq!(paginate(all.clone(), "b", "", 10).keys, keys(&["c", "d"]));
        assert_eq!(paginate(all.clone(), "bb", "", 10).keys, keys(&["c", "d"]));
        assert!(paginate(all, "z", "", 10).keys.is_empty());
    }

    #[test]
    fn prefix_selects_contiguous_run() {
        let all = keys(&["apple", "b/1", "b/2", "b/3", "banana", "cherry"]);
        let page = paginate(all, "", "b/", 10);
        assert_eq!(page.keys, keys(&["b/1", "b/2", "b/3"]));
        assert!(!page.is_truncated);
    }

    #[test]
    fn prefix_and_marker_combine() {
        let all = keys(&["a", "b/1", "b/2", "b/3", "c"]);
        let page = paginate(all, "b/1", "b/", 1);
        assert_eq!(page.keys, keys(&["b/2"]));
        assert!(page.is_truncated);
    }

    #[test]
    fn truncation_ignores_keys_outside_prefix() {
        let page = paginate(keys(&["x1", "x2", "y"]), "", "x", 2);
        assert_eq!(page.keys, keys(&["x1", "x2"]));
        assert!(!page.is_truncated);
    }

    #[test]
    fn empty_prefix_lists_everything() {
        // A key sorting before the others must not end the listing.
        let all = keys(&["zeta", "Alpha", "beta", "0001"]);
        let page = paginate(all, "", "", 100);
        assert_eq!(page.keys, keys(&["0001", "Alpha", "beta", "zeta"]));
    }

    #[test]
    fn reserved_keys_are_hidden() {
        let page = paginate(keys(&["b", CREATION_MARKER_KEY, "a"]), "", "", 10);
        assert_eq!(page.keys, keys(&["a", "b"]));
    }

    #[test]
    fn zero_max_keys_reports_truncation_only() {
        let page = paginate(keys(&["a"]), "", "", 0);
        assert!(page.keys.is_empty());
        assert!(page.is_truncated);

        let page = paginate(Vec::new(), "", "", 0);
        assert!(!page.is_truncated);
    }

    #[test]
    fn following_markers_reproduces_full_listing() {
        let all: Vec<String> = (0..37).rev().map(|i| format!("key-{i:03}")).collect();
        let mut expected = all.clone();
        expected.sort();

        for page_size in [1, 2, 5, 36, 37, 100] {
            let mut collected = Vec::new();
            let mut marker = String::new();
            loop {
                let page = paginate(all.clone(), &marker, "", page_size);
                assert!(page.keys.len() <= page_size);
                if let Some(last) = page.keys.last() {
                    marker = last.clone();
                }
                collected.extend(page.keys);
                if !page.is_truncated {
                    break;
                }
            }
            assert_eq!(collected, expected, "page size {page_size}");
        }
    }
}
