//! Content addressing for cache entries.
//!
//! A cache key is the hex SHA-256 of the source path joined with the source
//! modification time in epoch milliseconds. Touching a file therefore moves
//! its thumbnail to a new key, and the stale entry is simply never hit again.
//!
//! An empty key means "this path cannot be addressed" and is reported by
//! callers as [`crate::error::CacheError::InvalidPath`].

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Derive the key for `path` as it looked at `mtime`.
///
/// Returns an empty string when the path is not valid UTF-8.
#[must_use]
pub fn cache_key(path: &Path, mtime: DateTime<Utc>) -> String {
    match path.to_str() {
        Some(path_str) if !path_str.is_empty() => {
            let millis = mtime.timestamp_millis().to_string();
            digest_hex(&[path_str.as_bytes(), b"|", millis.as_bytes()])
        }
        _ => String::new(),
    }
}

/// Derive the key for `path` using its current modification time.
///
/// Falls back to hashing the path alone when the file cannot be stat'ed,
/// so lookups for missing files are still stable.
#[must_use]
pub fn cache_key_for_path(path: &Path) -> String {
    match source_mtime(path) {
        Some(mtime) => cache_key(path, mtime),
        None => match path.to_str() {
            Some(path_str) if !path_str.is_empty() => digest_hex(&[path_str.as_bytes()]),
            _ => String::new(),
        },
    }
}

/// Best-effort modification time of `path`.
#[must_use]
pub fn source_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// SHA-256 of `parts` fed in order, lowercase hex.
pub(crate) fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}
