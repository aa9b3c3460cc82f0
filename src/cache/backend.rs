//! Storage engine seam.
//!
//! [`StoreBackend`] is the narrow interface the persistent store drives. The
//! production engine is [`crate::cache::database::SqliteBackend`];
//! [`MemoryBackend`] keeps rows in a `HashMap` and is used by tests and for
//! throwaway caches.
//!
//! Backends see blobs exactly as stored: compression and payload
//! verification happen one layer up in [`crate::cache::store`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::cache::entry::ThumbnailMetadata;
use crate::error::CacheResult;

/// Version of the row layout. Bumping it invalidates every stored entry.
pub const SCHEMA_VERSION: u32 = 2;

/// A row as persisted: metadata plus the stored (possibly compressed) blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Row metadata.
    pub metadata: ThumbnailMetadata,
    /// Stored blob.
    pub blob: Vec<u8>,
}

/// Aggregates computed over every stored row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskStats {
    /// Number of rows.
    pub total_entries: u64,
    /// Sum of uncompressed payload sizes.
    pub total_size_bytes: u64,
    /// Smallest `cached_at`.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Largest `cached_at`.
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Operations a storage engine must provide.
///
/// Implementations are driven from one thread at a time (the store wraps
/// them in a mutex) but must be movable to the worker thread.
pub trait StoreBackend: Send {
    /// Fetch a full row.
    fn fetch(&mut self, key: &str) -> CacheResult<Option<StoredRow>>;

    /// Fetch a row's metadata without its blob.
    fn fetch_metadata(&mut self, key: &str) -> CacheResult<Option<ThumbnailMetadata>>;

    /// Whether a row exists for `key`.
    fn exists(&mut self, key: &str) -> CacheResult<bool>;

    /// Insert or fully replace the row for `metadata.cache_key`.
    fn upsert(&mut self, metadata: &ThumbnailMetadata, blob: &[u8]) -> CacheResult<()>;

    /// Delete one row. Returns whether it existed.
    fn delete(&mut self, key: &str) -> CacheResult<bool>;

    /// Delete rows cached strictly before `cutoff`.
    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> CacheResult<usize>;

    /// Delete the given keys, returning how many rows went away.
    fn delete_keys(&mut self, keys: &[String]) -> CacheResult<usize>;

    /// Every `(cache_key, source_path)` pair.
    fn source_paths(&mut self) -> CacheResult<Vec<(String, PathBuf)>>;

    /// `(cache_key, data_size)` for every row, oldest `cached_at` first.
    fn keys_by_age(&mut self) -> CacheResult<Vec<(String, u64)>>;

    /// Count, summed size and `cached_at` range in one pass.
    fn stats(&mut self) -> CacheResult<DiskStats>;

    /// Delete every row.
    fn clear(&mut self) -> CacheResult<usize>;

    /// Reclaim unused space. No logical effect.
    fn vacuum(&mut self) -> CacheResult<()>;
}

/// Rows and schema marker of a [`MemoryBackend`], detachable so a test can
/// "reopen" the same data.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    /// Schema version the rows were written under.
    pub schema_version: u32,
    /// Stored rows by key.
    pub rows: HashMap<String, StoredRow>,
}

/// Volatile backend over a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: HashMap<String, StoredRow>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reopen a snapshot. Rows written under another schema version are
    /// dropped, as the SQLite engine does on open.
    #[must_use]
    pub fn restore(snapshot: MemorySnapshot) -> Self {
        if snapshot.schema_version != SCHEMA_VERSION {
            log::warn!(
                "Schema version {} != {}, discarding {} cached rows",
                snapshot.schema_version,
                SCHEMA_VERSION,
                snapshot.rows.len()
            );
            return Self::new();
        }
        Self {
            rows: snapshot.rows,
        }
    }

    /// Copy out the current rows under the current schema version.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            schema_version: SCHEMA_VERSION,
            rows: self.rows.clone(),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn fetch(&mut self, key: &str) -> CacheResult<Option<StoredRow>> {
        Ok(self.rows.get(key).cloned())
    }

    fn fetch_metadata(&mut self, key: &str) -> CacheResult<Option<ThumbnailMetadata>> {
        Ok(self.rows.get(key).map(|r| r.metadata.clone()))
    }

    fn exists(&mut self, key: &str) -> CacheResult<bool> {
        Ok(self.rows.contains_key(key))
    }

    fn upsert(&mut self, metadata: &ThumbnailMetadata, blob: &[u8]) -> CacheResult<()> {
        self.rows.insert(
            metadata.cache_key.clone(),
            StoredRow {
                metadata: metadata.clone(),
                blob: blob.to_vec(),
            },
        );
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        Ok(self.rows.remove(key).is_some())
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        let before = self.rows.len();
        self.rows.retain(|_, r| r.metadata.cached_at >= cutoff);
        Ok(before - self.rows.len())
    }

    fn delete_keys(&mut self, keys: &[String]) -> CacheResult<usize> {
        Ok(keys.iter().filter(|k| self.rows.remove(*k).is_some()).count())
    }

    fn source_paths(&mut self) -> CacheResult<Vec<(String, PathBuf)>> {
        Ok(self
            .rows
            .values()
            .map(|r| (r.metadata.cache_key.clone(), r.metadata.source_path.clone()))
            .collect())
    }

    fn keys_by_age(&mut self) -> CacheResult<Vec<(String, u64)>> {
        let mut rows: Vec<&StoredRow> = self.rows.values().collect();
        rows.sort_by(|a, b| {
            a.metadata
                .cached_at
                .cmp(&b.metadata.cached_at)
                .then_with(|| a.metadata.cache_key.cmp(&b.metadata.cache_key))
        });
        Ok(rows
            .into_iter()
            .map(|r| (r.metadata.cache_key.clone(), r.metadata.data_size))
            .collect())
    }

    fn stats(&mut self) -> CacheResult<DiskStats> {
        let mut stats = DiskStats::default();
        for row in self.rows.values() {
            let at = row.metadata.cached_at;
            stats.total_entries += 1;
            stats.total_size_bytes += row.metadata.data_size;
            stats.oldest_entry = Some(stats.oldest_entry.map_or(at, |o| o.min(at)));
            stats.newest_entry = Some(stats.newest_entry.map_or(at, |n| n.max(at)));
        }
        Ok(stats)
    }

    fn clear(&mut self) -> CacheResult<usize> {
        let count = self.rows.len();
        self.rows.clear();
        Ok(count)
    }

    fn vacuum(&mut self) -> CacheResult<()> {
        self.rows.shrink_to_fit();
        Ok(())
    }
}
