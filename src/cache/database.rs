//! SQLite-backed thumbnail store.
//!
//! One table holds a row per cache key; a single-row `schema_version` table
//! gates compatibility. When the stored version differs from
//! [`SCHEMA_VERSION`] the thumbnails table is dropped and recreated empty.
//! Rows are never migrated.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::backend::{DiskStats, StoreBackend, StoredRow, SCHEMA_VERSION};
use crate::cache::entry::ThumbnailMetadata;
use crate::error::{CacheError, CacheResult};

/// File name used when the configured location is a directory.
pub const DEFAULT_DB_FILENAME: &str = "thumbcache.db";

const CREATE_THUMBNAILS: &str = "
    CREATE TABLE IF NOT EXISTS thumbnails (
        cache_key       TEXT PRIMARY KEY NOT NULL,
        source_path     TEXT NOT NULL,
        content_hash    TEXT NOT NULL,
        width           INTEGER NOT NULL,
        height          INTEGER NOT NULL,
        original_width  INTEGER NOT NULL DEFAULT 0,
        original_height INTEGER NOT NULL DEFAULT 0,
        source_mtime    INTEGER,
        cached_at       INTEGER NOT NULL,
        data_size       INTEGER NOT NULL,
        data            BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_thumbnails_cached_at ON thumbnails(cached_at);
";

const METADATA_COLUMNS: &str = "cache_key, source_path, content_hash, width, height, \
     original_width, original_height, source_mtime, cached_at, data_size";

/// Resolve the configured location to a database file.
///
/// An existing directory resolves to [`DEFAULT_DB_FILENAME`] inside it.
#[must_use]
pub fn resolve_db_path(location: &Path) -> PathBuf {
    if location.is_dir() {
        location.join(DEFAULT_DB_FILENAME)
    } else {
        location.to_path_buf()
    }
}

/// Persistent backend over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
    path: PathBuf,
}

impl SqliteBackend {
    /// Open or create the database at `location`, invalidating it if it was
    /// written under another schema version.
    pub fn open(location: &Path) -> CacheResult<Self> {
        let path = resolve_db_path(location);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        let mut backend = Self { conn, path };
        backend.ensure_schema()?;
        log::debug!("Opened thumbnail store at {}", backend.path.display());
        Ok(backend)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut backend = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        backend.ensure_schema()?;
        Ok(backend)
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&mut self) -> CacheResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                id      INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            )",
            [],
        )?;

        let stored: Option<u32> = tx
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |r| {
                r.get(0)
            })
            .optional()?;

        if stored != Some(SCHEMA_VERSION) {
            if let Some(old) = stored {
                log::warn!(
                    "Thumbnail store schema {} is incompatible with {}, invalidating cache",
                    old,
                    SCHEMA_VERSION
                );
            }
            tx.execute("DROP TABLE IF EXISTS thumbnails", [])?;
            tx.execute(
                "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        tx.execute_batch(CREATE_THUMBNAILS)?;
        tx.commit()?;
        Ok(())
    }
}

/// Metadata columns as read from SQLite, before range checks.
struct RawMetadata {
    cache_key: String,
    source_path: String,
    content_hash: String,
    width: i64,
    height: i64,
    original_width: i64,
    original_height: i64,
    source_mtime: Option<i64>,
    cached_at: i64,
    data_size: i64,
}

impl RawMetadata {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cache_key: row.get(0)?,
            source_path: row.get(1)?,
            content_hash: row.get(2)?,
            width: row.get(3)?,
            height: row.get(4)?,
            original_width: row.get(5)?,
            original_height: row.get(6)?,
            source_mtime: row.get(7)?,
            cached_at: row.get(8)?,
            data_size: row.get(9)?,
        })
    }

    fn into_metadata(self) -> CacheResult<ThumbnailMetadata> {
        let corrupt = |what: &str| CacheError::CorruptedData(format!("{} out of range", what));
        let dim = |v: i64, what: &str| u32::try_from(v).map_err(|_| corrupt(what));

        Ok(ThumbnailMetadata {
            width: dim(self.width, "width")?,
            height: dim(self.height, "height")?,
            original_width: dim(self.original_width, "original_width")?,
            original_height: dim(self.original_height, "original_height")?,
            source_mtime: match self.source_mtime {
                Some(ms) => Some(from_millis(ms).ok_or_else(|| corrupt("source_mtime"))?),
                None => None,
            },
            cached_at: from_millis(self.cached_at).ok_or_else(|| corrupt("cached_at"))?,
            data_size: u64::try_from(self.data_size).map_err(|_| corrupt("data_size"))?,
            cache_key: self.cache_key,
            source_path: PathBuf::from(self.source_path),
            content_hash: self.content_hash,
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn path_to_sql(path: &Path) -> CacheResult<&str> {
    path.to_str()
        .ok_or_else(|| CacheError::InvalidPath(path.to_path_buf()))
}

impl StoreBackend for SqliteBackend {
    fn fetch(&mut self, key: &str) -> CacheResult<Option<StoredRow>> {
        let sql = format!("SELECT {METADATA_COLUMNS}, data FROM thumbnails WHERE cache_key = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![key], |row| {
                Ok((RawMetadata::from_row(row)?, row.get::<_, Vec<u8>>(10)?))
            })
            .optional()?;

        match raw {
            Some((meta, blob)) => Ok(Some(StoredRow {
                metadata: meta.into_metadata()?,
                blob,
            })),
            None => Ok(None),
        }
    }

    fn fetch_metadata(&mut self, key: &str) -> CacheResult<Option<ThumbnailMetadata>> {
        let sql = format!("SELECT {METADATA_COLUMNS} FROM thumbnails WHERE cache_key = ?1");
        self.conn
            .query_row(&sql, params![key], RawMetadata::from_row)
            .optional()?
            .map(RawMetadata::into_metadata)
            .transpose()
    }

    fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM thumbnails WHERE cache_key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert(&mut self, metadata: &ThumbnailMetadata, blob: &[u8]) -> CacheResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO thumbnails (
                cache_key, source_path, content_hash, width, height,
                original_width, original_height, source_mtime, cached_at, data_size, data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                metadata.cache_key,
                path_to_sql(&metadata.source_path)?,
                metadata.content_hash,
                metadata.width,
                metadata.height,
                metadata.original_width,
                metadata.original_height,
                metadata.source_mtime.map(|t| t.timestamp_millis()),
                metadata.cached_at.timestamp_millis(),
                metadata.data_size as i64,
                blob,
            ],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM thumbnails WHERE cache_key = ?1", params![key])?;
        Ok(n > 0)
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM thumbnails WHERE cached_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(n)
    }

    fn delete_keys(&mut self, keys: &[String]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM thumbnails WHERE cache_key = ?1")?;
            for key in keys {
                removed += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn source_paths(&mut self) -> CacheResult<Vec<(String, PathBuf)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT cache_key, source_path FROM thumbnails")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, PathBuf::from(r.get::<_, String>(1)?)))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn keys_by_age(&mut self) -> CacheResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT cache_key, data_size FROM thumbnails ORDER BY cached_at ASC, cache_key ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, size) = row?;
            out.push((key, u64::try_from(size).unwrap_or(0)));
        }
        Ok(out)
    }

    fn stats(&mut self) -> CacheResult<DiskStats> {
        let (count, size, oldest, newest): (i64, i64, Option<i64>, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(data_size), 0), MIN(cached_at), MAX(cached_at)
                 FROM thumbnails",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?;
        Ok(DiskStats {
            total_entries: u64::try_from(count).unwrap_or(0),
            total_size_bytes: u64::try_from(size).unwrap_or(0),
            oldest_entry: oldest.and_then(from_millis),
            newest_entry: newest.and_then(from_millis),
        })
    }

    fn clear(&mut self) -> CacheResult<usize> {
        Ok(self.conn.execute("DELETE FROM thumbnails", [])?)
    }

    fn vacuum(&mut self) -> CacheResult<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}
