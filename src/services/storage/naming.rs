//! Bucket-name and object-key validation shared by every backend.

use super::{StorageError, StorageResult, listing::is_reserved_key};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
///
/// The name becomes a directory or a metadata namespace, so anything that
/// could escape the storage root is rejected here.
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Validate an object key.
///
/// Keys read as relative paths, so every `/`-separated segment must be a
/// plain name on both backends.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = |reason: &'static str| StorageError::InvalidObjectKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid("key is longer than 1024 bytes"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("key cannot begin or end with `/`"));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("key contains an empty, `.` or `..` segment"));
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err(invalid("key contains control characters or backslashes"));
    }
    if is_reserved_key(key) {
        return Err(invalid("key is reserved"));
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
