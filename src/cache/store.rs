//! Persistent thumbnail store.
//!
//! [`PersistentStore`] layers payload compression and integrity checks over
//! a [`StoreBackend`], and offers every operation in two modes:
//!
//! * **Synchronous**: runs on the calling thread under the store mutex.
//! * **Asynchronous**: queued on the single store worker and delivered
//!   through a [`PendingOp`].
//!
//! Both modes share the same mutex, so no two store operations ever
//! interleave at the storage layer.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::backend::{DiskStats, StoreBackend};
use crate::cache::codec::{decode_payload, encode_payload, Codec, ZstdCodec};
use crate::cache::database::SqliteBackend;
use crate::cache::entry::{payload_hash, ThumbnailEntry, ThumbnailMetadata};
use crate::cache::worker::{lock, PendingOp, Worker};
use crate::error::{CacheError, CacheResult};

const WORKER_THREAD_NAME: &str = "thumbcache-store";

/// State shared between calling threads and the worker.
pub struct StoreCore {
    backend: Mutex<Box<dyn StoreBackend>>,
    codec: Box<dyn Codec>,
    compression_level: i32,
}

impl StoreCore {
    fn backend(&self) -> MutexGuard<'_, Box<dyn StoreBackend>> {
        lock(&self.backend)
    }

    /// Fetch, decompress and verify an entry.
    pub fn get(&self, key: &str) -> CacheResult<ThumbnailEntry> {
        let row = self.backend().fetch(key)?.ok_or(CacheError::NotFound)?;
        let data = decode_payload(self.codec.as_ref(), row.blob, row.metadata.data_size)?;
        verify_payload(&row.metadata, &data)?;
        Ok(ThumbnailEntry {
            metadata: row.metadata,
            data,
        })
    }

    /// Fetch metadata only.
    pub fn get_metadata(&self, key: &str) -> CacheResult<ThumbnailMetadata> {
        self.backend()
            .fetch_metadata(key)?
            .ok_or(CacheError::NotFound)
    }

    /// Whether an entry exists.
    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        self.backend().exists(key)
    }

    /// Insert or replace an entry.
    pub fn put(&self, entry: &ThumbnailEntry) -> CacheResult<()> {
        if entry.metadata.cache_key.is_empty() {
            return Err(CacheError::InvalidPath(entry.metadata.source_path.clone()));
        }
        if !entry.is_valid() {
            return Err(CacheError::CorruptedData(format!(
                "refusing to store invalid entry for {}",
                entry.metadata.source_path.display()
            )));
        }
        // Compress before taking the lock.
        let blob = encode_payload(self.codec.as_ref(), &entry.data, self.compression_level)?;
        self.backend().upsert(&entry.metadata, &blob)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        self.backend().delete(key)
    }

    /// Remove entries cached before `cutoff`.
    pub fn remove_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        self.backend().delete_older_than(cutoff)
    }

    /// Remove entries whose source file no longer exists.
    ///
    /// The scan and the delete are separate steps; a file deleted or
    /// recreated in between may be handled either way.
    pub fn remove_orphaned(&self) -> CacheResult<usize> {
        let pairs = self.backend().source_paths()?;
        let orphans: Vec<String> = pairs
            .into_iter()
            .filter(|(_, path)| !path.exists())
            .map(|(key, _)| key)
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        log::debug!("Found {} orphaned thumbnails", orphans.len());
        self.backend().delete_keys(&orphans)
    }

    /// Evict oldest entries until at most `max_entries` rows and
    /// `max_size_bytes` of payload remain.
    pub fn remove_oldest_until(&self, max_entries: u64, max_size_bytes: u64) -> CacheResult<usize> {
        let mut backend = self.backend();
        let rows = backend.keys_by_age()?;
        let mut entries = rows.len() as u64;
        let mut bytes: u64 = rows.iter().map(|(_, size)| size).sum();

        let mut victims = Vec::new();
        for (key, size) in rows {
            if entries <= max_entries && bytes <= max_size_bytes {
                break;
            }
            entries -= 1;
            bytes = bytes.saturating_sub(size);
            victims.push(key);
        }
        backend.delete_keys(&victims)
    }

    /// Aggregate disk statistics.
    pub fn stats(&self) -> CacheResult<DiskStats> {
        self.backend().stats()
    }

    /// Remove every entry.
    pub fn clear(&self) -> CacheResult<usize> {
        self.backend().clear()
    }

    /// Reclaim disk space.
    pub fn vacuum(&self) -> CacheResult<()> {
        self.backend().vacuum()
    }
}

fn verify_payload(metadata: &ThumbnailMetadata, data: &[u8]) -> CacheResult<()> {
    if data.len() as u64 != metadata.data_size {
        return Err(CacheError::CorruptedData(format!(
            "payload is {} bytes, expected {}",
            data.len(),
            metadata.data_size
        )));
    }
    if payload_hash(data) != metadata.content_hash {
        return Err(CacheError::CorruptedData(
            "payload hash does not match".to_string(),
        ));
    }
    Ok(())
}

/// Durable, single-writer thumbnail store.
pub struct PersistentStore {
    core: Arc<StoreCore>,
    worker: Worker<StoreCore>,
}

impl PersistentStore {
    /// Open the SQLite store at `location` (a file, or a directory that will
    /// hold `thumbcache.db`).
    pub fn open(location: &Path, compression_level: i32) -> CacheResult<Self> {
        let backend = SqliteBackend::open(location)?;
        Self::with_backend(Box::new(backend), compression_level)
    }

    /// Wrap an arbitrary backend, using zstd for compression.
    pub fn with_backend(
        backend: Box<dyn StoreBackend>,
        compression_level: i32,
    ) -> CacheResult<Self> {
        Self::with_codec(backend, Box::new(ZstdCodec), compression_level)
    }

    /// Wrap an arbitrary backend and codec.
    pub fn with_codec(
        backend: Box<dyn StoreBackend>,
        codec: Box<dyn Codec>,
        compression_level: i32,
    ) -> CacheResult<Self> {
        let core = Arc::new(StoreCore {
            backend: Mutex::new(backend),
            codec,
            compression_level,
        });
        let worker = Worker::spawn(WORKER_THREAD_NAME, Arc::clone(&core))?;
        Ok(Self { core, worker })
    }

    /// Compression level payloads are written with (0 = raw).
    #[must_use]
    pub fn compression_level(&self) -> i32 {
        self.core.compression_level
    }

    /// Fetch an entry. A missing key is [`CacheError::NotFound`].
    pub fn get(&self, key: &str) -> CacheResult<ThumbnailEntry> {
        self.core.get(key)
    }

    /// Fetch an entry's metadata without its payload.
    pub fn get_metadata(&self, key: &str) -> CacheResult<ThumbnailMetadata> {
        self.core.get_metadata(key)
    }

    /// Whether an entry exists for `key`.
    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        self.core.exists(key)
    }

    /// Insert or fully replace an entry.
    pub fn put(&self, entry: &ThumbnailEntry) -> CacheResult<()> {
        self.core.put(entry)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        self.core.remove(key)
    }

    /// Remove entries cached before `cutoff`.
    pub fn remove_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        self.core.remove_older_than(cutoff)
    }

    /// Remove entries whose source file is gone.
    pub fn remove_orphaned(&self) -> CacheResult<usize> {
        self.core.remove_orphaned()
    }

    /// Evict oldest entries until both limits hold.
    pub fn remove_oldest_until(&self, max_entries: u64, max_size_bytes: u64) -> CacheResult<usize> {
        self.core.remove_oldest_until(max_entries, max_size_bytes)
    }

    /// Count, size and age range of stored entries.
    pub fn get_stats(&self) -> CacheResult<DiskStats> {
        self.core.stats()
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&self) -> CacheResult<usize> {
        self.core.clear()
    }

    /// Reclaim disk space.
    pub fn vacuum(&self) -> CacheResult<()> {
        self.core.vacuum()
    }

    /// Queue a fetch.
    pub fn get_async(&self, key: &str) -> PendingOp<ThumbnailEntry> {
        self.get_async_then(key, |result| result)
    }

    /// Queue a fetch and run `then` on the worker once the store lock has
    /// been released.
    pub fn get_async_then<T, F>(&self, key: &str, then: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(CacheResult<ThumbnailEntry>) -> CacheResult<T> + Send + 'static,
    {
        let key = key.to_string();
        self.submit(move |core| then(core.get(&key)))
    }

    /// Queue an insert-or-replace.
    pub fn put_async(&self, entry: ThumbnailEntry) -> PendingOp<()> {
        self.submit(move |core| core.put(&entry))
    }

    /// Queue a removal.
    pub fn remove_async(&self, key: &str) -> PendingOp<bool> {
        let key = key.to_string();
        self.submit(move |core| core.remove(&key))
    }

    /// Stop the worker after draining queued operations.
    ///
    /// The store stays usable; later async calls run on the calling thread.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    fn submit<T, F>(&self, op: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreCore) -> CacheResult<T> + Send + 'static,
    {
        let (resolver, pending) = PendingOp::channel();
        self.worker
            .submit(Box::new(move |core: &StoreCore| resolver.resolve(op(core))));
        pending
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("compression_level", &self.core.compression_level)
            .field("worker_running", &self.worker.is_running())
            .finish()
    }
}
