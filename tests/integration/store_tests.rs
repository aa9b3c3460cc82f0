use rusqlite::{params, Connection};
use std::path::PathBuf;
use tempfile::tempdir;
use thumbcache::cache::codec::{is_compressed, COMPRESSED_MAGIC};
use thumbcache::cache::{
    PersistentStore, SqliteBackend, ThumbnailEntry, DEFAULT_DB_FILENAME, SCHEMA_VERSION,
};
use thumbcache::error::CacheError;

fn entry(key: &str, data: Vec<u8>) -> ThumbnailEntry {
    let side = ((data.len() / 4) as f64).sqrt() as u32;
    ThumbnailEntry::new(
        key.to_string(),
        PathBuf::from(format!("/photos/{key}.png")),
        side,
        side,
        data,
    )
    .with_original_size(side * 10, side * 10)
}

fn stored_blob(db: &std::path::Path, key: &str) -> Vec<u8> {
    let conn = Connection::open(db).unwrap();
    conn.query_row(
        "SELECT data FROM thumbnails WHERE cache_key = ?1",
        params![key],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn test_directory_location_uses_default_file() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(dir.path(), 0).unwrap();
    store.put(&entry("k", vec![1; 16])).unwrap();
    store.shutdown();
    assert!(dir.path().join(DEFAULT_DB_FILENAME).is_file());
}

#[test]
fn test_uncompressed_blob_is_raw_payload() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("raw.db");
    let payload: Vec<u8> = (0..64u8).collect();

    let store = PersistentStore::open(&db, 0).unwrap();
    store.put(&entry("raw", payload.clone())).unwrap();
    store.shutdown();

    assert_eq!(stored_blob(&db, "raw"), payload);
}

#[test]
fn test_compressed_blob_differs_and_decodes() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("zstd.db");
    let payload = vec![0xAB; 64 * 64 * 4];

    let store = PersistentStore::open(&db, 3).unwrap();
    let original = entry("zstd", payload.clone());
    store.put(&original).unwrap();

    let blob = stored_blob(&db, "zstd");
    assert_ne!(blob, payload);
    assert!(blob.starts_with(COMPRESSED_MAGIC));
    assert!(is_compressed(&blob));
    assert!(blob.len() < payload.len());

    let read = store.get("zstd").unwrap();
    assert_eq!(read, original);
    assert_eq!(read.metadata.data_size, payload.len() as u64);
}

#[test]
fn test_raw_pixels_resembling_header_round_trip() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("lookalike.db");
    let store = PersistentStore::open(&db, 0).unwrap();

    for (key, declared) in [("five", 5u64), ("max", u64::MAX), ("exact", 64)] {
        let mut payload = COMPRESSED_MAGIC.to_vec();
        payload.extend_from_slice(&declared.to_le_bytes());
        payload.resize(64, 0x42);
        let original = entry(key, payload.clone());
        store.put(&original).unwrap();

        assert_eq!(stored_blob(&db, key), payload);
        assert_eq!(store.get(key).unwrap(), original);
    }
}

#[test]
fn test_compression_level_change_reads_old_entries() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("mixed.db");

    let store = PersistentStore::open(&db, 0).unwrap();
    store.put(&entry("old", vec![7; 16])).unwrap();
    store.shutdown();
    drop(store);

    let store = PersistentStore::open(&db, 9).unwrap();
    store.put(&entry("new", vec![8; 16])).unwrap();
    assert_eq!(store.get("old").unwrap().data, vec![7; 16]);
    assert_eq!(store.get("new").unwrap().data, vec![8; 16]);
}

#[test]
fn test_schema_mismatch_invalidates_entries() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("schema.db");

    {
        let store = PersistentStore::open(&db, 0).unwrap();
        store.put(&entry("a", vec![1; 16])).unwrap();
        store.put(&entry("b", vec![2; 16])).unwrap();
        store.shutdown();
    }

    {
        let conn = Connection::open(&db).unwrap();
        conn.execute(
            "UPDATE schema_version SET version = ?1 WHERE id = 1",
            params![SCHEMA_VERSION - 1],
        )
        .unwrap();
    }

    let store = PersistentStore::open(&db, 0).unwrap();
    assert_eq!(store.get_stats().unwrap().total_entries, 0);
    assert!(matches!(store.get("a"), Err(CacheError::NotFound)));
    store.put(&entry("c", vec![3; 16])).unwrap();
    assert_eq!(store.get("c").unwrap().data, vec![3; 16]);

    let conn = Connection::open(&db).unwrap();
    let version: u32 = conn
        .query_row("SELECT version FROM schema_version", [], |r| r.get(0))
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[test]
fn test_reopen_with_same_schema_keeps_entries() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("keep.db");
    let original = entry("keep", vec![5; 36]);
    {
        let store = PersistentStore::open(&db, 0).unwrap();
        store.put(&original).unwrap();
        store.shutdown();
    }
    let store = PersistentStore::open(&db, 0).unwrap();
    assert_eq!(store.get("keep").unwrap(), original);
}

#[test]
fn test_put_replaces_existing_key() {
    let store = PersistentStore::with_backend(Box::new(SqliteBackend::open_in_memory().unwrap()), 0)
        .unwrap();
    store.put(&entry("k", vec![1; 16])).unwrap();
    store.put(&entry("k", vec![2; 16])).unwrap();
    assert_eq!(store.get("k").unwrap().data, vec![2; 16]);
    assert_eq!(store.get_stats().unwrap().total_entries, 1);
}

#[test]
fn test_metadata_without_payload() {
    let store = PersistentStore::with_backend(Box::new(SqliteBackend::open_in_memory().unwrap()), 0)
        .unwrap();
    let original = entry("m", vec![3; 16]);
    store.put(&original).unwrap();
    assert_eq!(store.get_metadata("m").unwrap(), original.metadata);
    assert!(store.exists("m").unwrap());
    assert!(!store.exists("other").unwrap());
    assert!(matches!(
        store.get_metadata("other"),
        Err(CacheError::NotFound)
    ));
}

#[test]
fn test_remove_reports_presence() {
    let store = PersistentStore::with_backend(Box::new(SqliteBackend::open_in_memory().unwrap()), 0)
        .unwrap();
    store.put(&entry("gone", vec![1; 4])).unwrap();
    assert!(store.remove("gone").unwrap());
    assert!(!store.remove("gone").unwrap());
}

#[test]
fn test_empty_key_is_rejected() {
    let store = PersistentStore::with_backend(Box::new(SqliteBackend::open_in_memory().unwrap()), 0)
        .unwrap();
    let bad = ThumbnailEntry::new(String::new(), PathBuf::from("/x.png"), 1, 1, vec![0; 4]);
    assert!(matches!(store.put(&bad), Err(CacheError::InvalidPath(_))));
}

#[test]
fn test_vacuum_after_clear() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(&dir.path().join("v.db"), 0).unwrap();
    for i in 0..10 {
        store.put(&entry(&format!("k{i}"), vec![i as u8; 1024])).unwrap();
    }
    assert_eq!(store.clear().unwrap(), 10);
    store.vacuum().unwrap();
    assert_eq!(store.get_stats().unwrap().total_entries, 0);
}
