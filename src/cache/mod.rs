//! Thumbnail caching.
//!
//! Decoded thumbnails are kept in two tiers so the viewer rarely has to
//! re-decode a source image:
//!
//! * [`lru`]: a bounded in-memory LRU of recently used thumbnails.
//! * [`store`]: a durable, schema-versioned store with optional compression,
//!   driven synchronously or through a single background worker.
//!
//! # Architecture
//!
//! * [`key`]: content addressing from path + modification time.
//! * [`entry`]: the cached records and their validation.
//! * [`codec`]: payload compression with a self-describing header.
//! * [`backend`]: the storage engine trait and an in-memory engine.
//! * [`database`]: the SQLite engine and schema management.
//! * [`worker`]: the single-writer worker thread and [`PendingOp`] handles.
//! * [`manager`]: [`CacheManager`], the public two-tier API.
//!
//! # Cache Invalidation
//!
//! Keys include the source file's modification time, so editing a file
//! makes its old thumbnail unreachable. Old rows are reclaimed by
//! expiry, orphan cleanup or limit enforcement. Changing the on-disk schema
//! version discards every stored row on the next open.

pub mod backend;
pub mod codec;
pub mod database;
pub mod entry;
pub mod key;
pub mod lru;
pub mod manager;
pub mod store;
pub mod worker;

pub use backend::{DiskStats, MemoryBackend, StoreBackend, StoredRow, SCHEMA_VERSION};
pub use codec::{Codec, ZstdCodec};
pub use database::{SqliteBackend, DEFAULT_DB_FILENAME};
pub use entry::{ThumbnailEntry, ThumbnailMetadata};
pub use key::{cache_key, cache_key_for_path};
pub use lru::LruMemoryCache;
pub use manager::{CacheManager, CacheStats};
pub use store::PersistentStore;
pub use worker::PendingOp;
