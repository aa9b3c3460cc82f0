//! Two-tier thumbnail cache.
//!
//! [`CacheManager`] puts an [`LruMemoryCache`] in front of a
//! [`PersistentStore`]:
//!
//! * Reads check memory first, then disk, and backfill memory on a disk hit.
//! * Writes always land in memory synchronously; the disk write is either
//!   synchronous or queued on the store worker.
//!
//! The memory lock and the store lock are never held at the same time.
//!
//! # Example
//!
//! ```no_run
//! use thumbcache::cache::CacheManager;
//! use thumbcache::config::CacheConfig;
//! use thumbcache::pixels::PixelBuffer;
//! use std::path::Path;
//!
//! let cache = CacheManager::new(CacheConfig::with_db_path("/tmp/thumbs"));
//! let thumb = PixelBuffer::rgba(2, 2, vec![0; 16]);
//! cache.put_thumbnail(Path::new("photo.png"), &thumb, 4000, 3000)?;
//! let entry = cache.get_thumbnail(Path::new("photo.png"))?;
//! assert_eq!(entry.metadata.original_width, 4000);
//! # Ok::<(), thumbcache::error::CacheError>(())
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

use crate::cache::entry::ThumbnailEntry;
use crate::cache::key::{cache_key_for_path, source_mtime};
use crate::cache::lru::LruMemoryCache;
use crate::cache::store::PersistentStore;
use crate::cache::worker::{lock, PendingOp};
use crate::cache::StoreBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::pixels::PixelBuffer;

type MemoryTier = Mutex<LruMemoryCache<String, Arc<ThumbnailEntry>>>;

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries on disk.
    pub total_entries: u64,
    /// Summed uncompressed payload size on disk.
    pub total_size_bytes: u64,
    /// Lookups served from either tier.
    pub hits: u64,
    /// Lookups that found nothing or failed.
    pub misses: u64,
    /// Disk entries removed by maintenance (expiry, orphan cleanup and
    /// limit enforcement). Memory-tier LRU displacement is not counted.
    pub evictions: u64,
    /// Oldest `cached_at` on disk.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest `cached_at` on disk.
    pub newest_entry: Option<DateTime<Utc>>,
    /// Entries currently held in memory.
    pub memory_entries: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0 before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn evicted(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Memory + disk thumbnail cache.
pub struct CacheManager {
    config: CacheConfig,
    memory: Arc<MemoryTier>,
    store: Option<PersistentStore>,
    counters: Arc<Counters>,
}

impl CacheManager {
    /// Open the cache described by `config`.
    ///
    /// Never fails: if the store cannot be opened the error is logged,
    /// [`is_ready`](Self::is_ready) returns `false`, and every operation
    /// reports [`CacheError::Database`].
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let store = match PersistentStore::open(&config.db_path, config.compression_level) {
            Ok(store) => Some(store),
            Err(e) => {
                log::error!(
                    "Failed to open thumbnail store at {}: {}",
                    config.db_path.display(),
                    e
                );
                None
            }
        };
        Self::assemble(config, store)
    }

    /// Build a cache over a custom storage backend.
    pub fn with_backend(config: CacheConfig, backend: Box<dyn StoreBackend>) -> CacheResult<Self> {
        let store = PersistentStore::with_backend(backend, config.compression_level)?;
        Ok(Self::assemble(config, Some(store)))
    }

    fn assemble(config: CacheConfig, store: Option<PersistentStore>) -> Self {
        let memory = Arc::new(Mutex::new(LruMemoryCache::new(config.memory_cache_size)));
        Self {
            config,
            memory,
            store,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Whether the persistent store opened successfully.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.store.is_some()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn store(&self) -> CacheResult<&PersistentStore> {
        self.store.as_ref().ok_or_else(CacheError::not_ready)
    }

    fn key_for(path: &Path) -> CacheResult<String> {
        let key = cache_key_for_path(path);
        if key.is_empty() {
            Err(CacheError::InvalidPath(path.to_path_buf()))
        } else {
            Ok(key)
        }
    }

    fn memory_get(&self, key: &str) -> Option<Arc<ThumbnailEntry>> {
        lock(&self.memory).get(&key.to_string()).cloned()
    }

    fn memory_put(&self, entry: Arc<ThumbnailEntry>) {
        lock(&self.memory).put(entry.metadata.cache_key.clone(), entry);
    }

    /// Look up the thumbnail for `path`.
    ///
    /// A miss is [`CacheError::NotFound`]; storage failures are returned as
    /// their own errors.
    pub fn get_thumbnail(&self, path: &Path) -> CacheResult<Arc<ThumbnailEntry>> {
        let key = Self::key_for(path)?;

        if let Some(entry) = self.memory_get(&key) {
            self.counters.hit();
            log::debug!("Memory hit for {}", path.display());
            return Ok(entry);
        }

        let result = self.store().and_then(|store| store.get(&key));
        match result {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.memory_put(Arc::clone(&entry));
                self.counters.hit();
                log::debug!("Disk hit for {}", path.display());
                Ok(entry)
            }
            Err(e) => {
                self.counters.miss();
                if !e.is_miss() {
                    log::warn!("Thumbnail lookup failed for {}: {}", path.display(), e);
                }
                Err(e)
            }
        }
    }

    /// Whether a thumbnail for `path` is cached in either tier.
    pub fn has_thumbnail(&self, path: &Path) -> CacheResult<bool> {
        let key = Self::key_for(path)?;
        if lock(&self.memory).contains(&key) {
            return Ok(true);
        }
        self.store()?.exists(&key)
    }

    fn build_entry(
        path: &Path,
        image: &PixelBuffer,
        original_width: u32,
        original_height: u32,
    ) -> CacheResult<ThumbnailEntry> {
        let key = Self::key_for(path)?;
        let data = image.to_cache_layout()?;
        let entry = ThumbnailEntry::new(key, path.to_path_buf(), image.width, image.height, data)
            .with_original_size(original_width, original_height)
            .with_source_mtime(source_mtime(path));
        if !entry.is_valid() {
            return Err(CacheError::CorruptedData(format!(
                "empty thumbnail for {}",
                path.display()
            )));
        }
        Ok(entry)
    }

    /// Cache `image` as the thumbnail of `path`.
    ///
    /// The memory tier is always updated; only the disk write's error is
    /// returned.
    pub fn put_thumbnail(
        &self,
        path: &Path,
        image: &PixelBuffer,
        original_width: u32,
        original_height: u32,
    ) -> CacheResult<()> {
        let entry = Arc::new(Self::build_entry(
            path,
            image,
            original_width,
            original_height,
        )?);
        self.memory_put(Arc::clone(&entry));
        self.store()?.put(&entry)
    }

    /// Original image dimensions recorded for `path`.
    ///
    /// Served from memory when possible, otherwise from disk metadata
    /// without reading the payload.
    pub fn get_image_resolution(&self, path: &Path) -> CacheResult<(u32, u32)> {
        let key = Self::key_for(path)?;
        let cached = lock(&self.memory)
            .peek(&key)
            .map(|e| (e.metadata.original_width, e.metadata.original_height));
        if let Some(dims) = cached {
            return Ok(dims);
        }
        let meta = self.store()?.get_metadata(&key)?;
        Ok((meta.original_width, meta.original_height))
    }

    /// Drop the thumbnail for `path` from both tiers.
    ///
    /// Disk failures are logged and ignored.
    pub fn remove_thumbnail(&self, path: &Path) -> CacheResult<()> {
        let key = Self::key_for(path)?;
        lock(&self.memory).remove(&key);
        match self.store() {
            Ok(store) => {
                if let Err(e) = store.remove(&key) {
                    log::warn!("Failed to remove {} from disk cache: {}", path.display(), e);
                }
            }
            Err(e) => log::debug!("Skipping disk removal for {}: {}", path.display(), e),
        }
        Ok(())
    }

    /// Asynchronous [`get_thumbnail`](Self::get_thumbnail).
    ///
    /// A memory hit resolves immediately. Otherwise the disk read is queued
    /// and, on a hit, the memory tier is backfilled from the worker before
    /// the handle resolves.
    pub fn get_thumbnail_async(&self, path: &Path) -> PendingOp<Arc<ThumbnailEntry>> {
        let key = match Self::key_for(path) {
            Ok(key) => key,
            Err(e) => return PendingOp::ready(Err(e)),
        };

        if let Some(entry) = self.memory_get(&key) {
            self.counters.hit();
            return PendingOp::ready(Ok(entry));
        }

        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                self.counters.miss();
                return PendingOp::ready(Err(e));
            }
        };

        let memory = Arc::clone(&self.memory);
        let counters = Arc::clone(&self.counters);
        store.get_async_then(&key, move |result| match result {
            Ok(entry) => {
                let entry = Arc::new(entry);
                lock(&memory).put(entry.metadata.cache_key.clone(), Arc::clone(&entry));
                counters.hit();
                Ok(entry)
            }
            Err(e) => {
                counters.miss();
                Err(e)
            }
        })
    }

    /// Asynchronous [`put_thumbnail`](Self::put_thumbnail).
    ///
    /// The memory tier is updated before this returns; the handle resolves
    /// when the disk write completes.
    pub fn put_thumbnail_async(
        &self,
        path: &Path,
        image: &PixelBuffer,
        original_width: u32,
        original_height: u32,
    ) -> PendingOp<()> {
        let entry = match Self::build_entry(path, image, original_width, original_height) {
            Ok(entry) => entry,
            Err(e) => return PendingOp::ready(Err(e)),
        };
        self.memory_put(Arc::new(entry.clone()));
        match self.store() {
            Ok(store) => store.put_async(entry),
            Err(e) => PendingOp::ready(Err(e)),
        }
    }

    /// Empty the memory tier. Disk entries are untouched.
    pub fn clear_memory_cache(&self) {
        lock(&self.memory).clear();
    }

    /// Empty both tiers, returning the number of disk entries removed.
    pub fn clear_all(&self) -> CacheResult<usize> {
        self.clear_memory_cache();
        let removed = self.store()?.clear()?;
        log::info!("Cleared {} cached thumbnails", removed);
        Ok(removed)
    }

    /// Remove disk entries older than the retention period.
    ///
    /// Returns 0 without touching the store when no retention period is set.
    pub fn cleanup_expired(&self) -> CacheResult<usize> {
        let Some(retention) = self.config.retention_period else {
            return Ok(0);
        };
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| CacheError::Database(format!("retention period out of range: {e}")))?;
        let cutoff = Utc::now() - retention;
        let removed = self.store()?.remove_older_than(cutoff)?;
        self.counters.evicted(removed);
        if removed > 0 {
            log::info!("Expired {} thumbnails cached before {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Remove disk entries whose source file no longer exists.
    pub fn cleanup_orphaned(&self) -> CacheResult<usize> {
        let removed = self.store()?.remove_orphaned()?;
        self.counters.evicted(removed);
        if removed > 0 {
            log::info!("Removed {} orphaned thumbnails", removed);
        }
        Ok(removed)
    }

    /// Bring the disk tier back under `max_entries` and `max_size_bytes`.
    ///
    /// Expired entries go first; if the store is still over a limit, the
    /// oldest entries by `cached_at` are evicted until both limits hold.
    /// Returns the total number of entries removed.
    pub fn enforce_limits(&self) -> CacheResult<usize> {
        let store = self.store()?;
        let max_entries = self.config.max_entries;
        let max_bytes = self.config.max_size_bytes;
        let over = |s: &crate::cache::DiskStats| {
            s.total_entries > max_entries || s.total_size_bytes > max_bytes
        };

        if !over(&store.get_stats()?) {
            return Ok(0);
        }

        let mut removed = self.cleanup_expired()?;
        if over(&store.get_stats()?) {
            let evicted = store.remove_oldest_until(max_entries, max_bytes)?;
            self.counters.evicted(evicted);
            log::info!("Evicted {} oldest thumbnails to respect cache limits", evicted);
            removed += evicted;
        }
        Ok(removed)
    }

    /// Current statistics, with disk aggregates read on demand.
    pub fn get_stats(&self) -> CacheResult<CacheStats> {
        let disk = self.store()?.get_stats()?;
        Ok(CacheStats {
            total_entries: disk.total_entries,
            total_size_bytes: disk.total_size_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            oldest_entry: disk.oldest_entry,
            newest_entry: disk.newest_entry,
            memory_entries: lock(&self.memory).size(),
        })
    }

    /// Reclaim disk space held by deleted entries.
    pub fn compact(&self) -> CacheResult<()> {
        self.store()?.vacuum()
    }

    /// Warm the memory tier from disk for the files directly inside
    /// `directory`.
    ///
    /// Files already in memory are skipped. `on_warmed` is called for each
    /// thumbnail loaded. Failures are logged and skipped; the return value
    /// is the number of thumbnails warmed.
    pub fn prefetch<F>(&self, directory: &Path, mut on_warmed: F) -> usize
    where
        F: FnMut(&Path, &ThumbnailEntry),
    {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                log::warn!("Prefetch skipped: {}", e);
                return 0;
            }
        };

        let mut warmed = 0;
        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Prefetch skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path: PathBuf = entry.into_path();
            let key = cache_key_for_path(&path);
            if key.is_empty() || lock(&self.memory).contains(&key) {
                continue;
            }
            match store.get(&key) {
                Ok(thumb) => {
                    let thumb = Arc::new(thumb);
                    self.memory_put(Arc::clone(&thumb));
                    on_warmed(&path, &thumb);
                    warmed += 1;
                }
                Err(e) if e.is_miss() => {}
                Err(e) => log::debug!("Prefetch failed for {}: {}", path.display(), e),
            }
        }
        log::debug!(
            "Prefetched {} thumbnails from {}",
            warmed,
            directory.display()
        );
        warmed
    }

    /// Keys currently in memory, most recently used first.
    #[must_use]
    pub fn memory_keys(&self) -> Vec<String> {
        lock(&self.memory).keys_by_recency()
    }

    /// Drain queued disk operations and stop the store worker.
    pub fn shutdown(&self) {
        if let Some(store) = &self.store {
            store.shutdown();
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("memory_entries", &lock(&self.memory).size())
            .finish()
    }
}
