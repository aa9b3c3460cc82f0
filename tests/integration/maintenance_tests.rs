use chrono::{Duration as ChronoDuration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;
use thumbcache::cache::{cache_key_for_path, CacheManager, PersistentStore, ThumbnailEntry};
use thumbcache::config::CacheConfig;
use thumbcache::pixels::PixelBuffer;

fn thumb() -> PixelBuffer {
    PixelBuffer::rgba(2, 2, vec![1; 16])
}

fn aged_entry(path: &Path, age: ChronoDuration) -> ThumbnailEntry {
    ThumbnailEntry::new(
        cache_key_for_path(path),
        path.to_path_buf(),
        2,
        2,
        vec![4; 16],
    )
    .with_cached_at(Utc::now() - age)
}

#[test]
fn test_cleanup_orphaned_removes_deleted_sources() {
    let dir = tempdir().unwrap();
    let sources: Vec<PathBuf> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|n| dir.path().join(n))
        .collect();

    let cache = CacheManager::new(CacheConfig::with_db_path(dir.path().join("o.db")));
    for p in &sources {
        fs::write(p, b"pixels").unwrap();
        cache.put_thumbnail(p, &thumb(), 2, 2).unwrap();
    }
    fs::remove_file(&sources[1]).unwrap();
    fs::remove_file(&sources[2]).unwrap();

    assert_eq!(cache.cleanup_orphaned().unwrap(), 2);
    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.evictions, 2);

    cache.clear_memory_cache();
    assert!(cache.get_thumbnail(&sources[0]).is_ok());
    assert_eq!(cache.cleanup_orphaned().unwrap(), 0);
}

#[test]
fn test_cleanup_expired_uses_retention_period() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("e.db");

    {
        let store = PersistentStore::open(&db, 0).unwrap();
        for (name, hours) in [("fresh.png", 1), ("day.png", 25), ("two_days.png", 48)] {
            let path = dir.path().join(name);
            store
                .put(&aged_entry(&path, ChronoDuration::hours(hours)))
                .unwrap();
        }
        store.shutdown();
    }

    let mut config = CacheConfig::with_db_path(&db);
    config.retention_period = Some(Duration::from_secs(24 * 60 * 60));
    let cache = CacheManager::new(config);

    assert_eq!(cache.cleanup_expired().unwrap(), 2);
    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.total_entries, 1);
    assert!(cache.has_thumbnail(&dir.path().join("fresh.png")).unwrap());
    assert!(!cache.has_thumbnail(&dir.path().join("day.png")).unwrap());
}

#[test]
fn test_enforce_limits_prefers_expired_entries() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("l.db");

    {
        let store = PersistentStore::open(&db, 0).unwrap();
        for (name, hours) in [("a.png", 72), ("b.png", 3), ("c.png", 2), ("d.png", 1)] {
            store
                .put(&aged_entry(&dir.path().join(name), ChronoDuration::hours(hours)))
                .unwrap();
        }
        store.shutdown();
    }

    let mut config = CacheConfig::with_db_path(&db);
    config.retention_period = Some(Duration::from_secs(48 * 60 * 60));
    config.max_entries = 2;
    let cache = CacheManager::new(config);

    // a expires, then b is the oldest survivor.
    assert_eq!(cache.enforce_limits().unwrap(), 2);
    assert!(!cache.has_thumbnail(&dir.path().join("b.png")).unwrap());
    assert!(cache.has_thumbnail(&dir.path().join("c.png")).unwrap());
    assert!(cache.has_thumbnail(&dir.path().join("d.png")).unwrap());
}

#[test]
fn test_enforce_limits_by_size() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("s.db");
    {
        let store = PersistentStore::open(&db, 0).unwrap();
        for (i, hours) in [5, 4, 3, 2, 1].iter().enumerate() {
            let path = dir.path().join(format!("{i}.png"));
            store
                .put(&aged_entry(&path, ChronoDuration::hours(*hours)))
                .unwrap();
        }
        store.shutdown();
    }

    let mut config = CacheConfig::with_db_path(&db);
    config.retention_period = None;
    config.max_size_bytes = 40;
    let cache = CacheManager::new(config);

    assert_eq!(cache.enforce_limits().unwrap(), 3);
    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_size_bytes, 32);
}

#[test]
fn test_enforce_limits_within_bounds_is_noop() {
    let dir = tempdir().unwrap();
    let cache = CacheManager::new(CacheConfig::with_db_path(dir.path().join("n.db")));
    let p = dir.path().join("x.png");
    fs::write(&p, b"x").unwrap();
    cache.put_thumbnail(&p, &thumb(), 2, 2).unwrap();
    assert_eq!(cache.enforce_limits().unwrap(), 0);
    assert_eq!(cache.get_stats().unwrap().evictions, 0);
}

#[test]
fn test_compact_keeps_entries() {
    let dir = tempdir().unwrap();
    let cache = CacheManager::new(CacheConfig::with_db_path(dir.path().join("c.db")));
    let p = dir.path().join("x.png");
    fs::write(&p, b"x").unwrap();
    cache.put_thumbnail(&p, &thumb(), 2, 2).unwrap();
    cache.compact().unwrap();
    cache.clear_memory_cache();
    assert!(cache.get_thumbnail(&p).is_ok());
}
