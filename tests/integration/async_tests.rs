use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use thumbcache::cache::{CacheManager, PersistentStore, ThumbnailEntry};
use thumbcache::config::CacheConfig;
use thumbcache::error::CacheError;
use thumbcache::pixels::PixelBuffer;

fn entry(key: &str, fill: u8) -> ThumbnailEntry {
    ThumbnailEntry::new(
        key.to_string(),
        PathBuf::from(format!("/photos/{key}.png")),
        2,
        2,
        vec![fill; 16],
    )
}

#[test]
fn test_async_puts_apply_in_submission_order() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(&dir.path().join("order.db"), 0).unwrap();

    let first = store.put_async(entry("k", 1));
    let second = store.put_async(entry("k", 2));
    first.wait().unwrap();
    second.wait().unwrap();

    assert_eq!(store.get("k").unwrap().data, vec![2; 16]);
}

#[test]
fn test_async_get_sees_prior_async_put() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(&dir.path().join("seq.db"), 0).unwrap();

    let put = store.put_async(entry("k", 7));
    let get = store.get_async("k");
    let removed = store.remove_async("k");
    let missing = store.get_async("k");

    put.wait().unwrap();
    assert_eq!(get.wait().unwrap().data, vec![7; 16]);
    assert!(removed.wait().unwrap());
    assert!(matches!(missing.wait(), Err(CacheError::NotFound)));
}

#[test]
fn test_manager_async_put_then_get() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.png");
    fs::write(&source, b"a").unwrap();
    let cache = CacheManager::new(CacheConfig::with_db_path(dir.path().join("m.db")));

    let v1 = PixelBuffer::rgba(1, 1, vec![1, 1, 1, 1]);
    let v2 = PixelBuffer::rgba(1, 1, vec![2, 2, 2, 2]);
    let p1 = cache.put_thumbnail_async(&source, &v1, 1, 1);
    let p2 = cache.put_thumbnail_async(&source, &v2, 1, 1);

    // Memory is updated before the disk writes land.
    assert_eq!(cache.memory_keys().len(), 1);

    p1.wait().unwrap();
    p2.wait().unwrap();
    cache.clear_memory_cache();

    let loaded = cache.get_thumbnail_async(&source).wait().unwrap();
    assert_eq!(loaded.data, vec![2, 2, 2, 2]);
    assert_eq!(cache.memory_keys().len(), 1);
}

#[test]
fn test_pending_op_poll_and_cancel() {
    let dir = tempdir().unwrap();
    let store = PersistentStore::open(&dir.path().join("poll.db"), 0).unwrap();
    store.put(&entry("k", 3)).unwrap();

    let pending = store.get_async("k");
    assert!(matches!(pending.cancel(), Err(CacheError::Unsupported(_))));

    let result = loop {
        if let Some(result) = pending.poll() {
            break result;
        }
        thread::yield_now();
    };
    assert_eq!(result.unwrap().data, vec![3; 16]);
}

#[test]
fn test_shutdown_drains_queue() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("drain.db");
    let store = PersistentStore::open(&db, 0).unwrap();

    let pending: Vec<_> = (0..50)
        .map(|i| store.put_async(entry(&format!("k{i}"), i as u8)))
        .collect();
    store.shutdown();

    for p in pending {
        p.wait().unwrap();
    }
    assert_eq!(store.get_stats().unwrap().total_entries, 50);

    // After shutdown, async calls still complete on the caller.
    store.put_async(entry("late", 9)).wait().unwrap();
    assert!(store.exists("late").unwrap());
}

#[test]
fn test_concurrent_callers_share_store() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(CacheManager::new(CacheConfig::with_db_path(
        dir.path().join("shared.db"),
    )));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let root = dir.path().to_path_buf();
            thread::spawn(move || {
                for i in 0..10 {
                    let path = root.join(format!("t{t}_{i}.png"));
                    let img = PixelBuffer::rgba(1, 1, vec![t as u8; 4]);
                    if i % 2 == 0 {
                        cache.put_thumbnail(&path, &img, 1, 1).unwrap();
                    } else {
                        cache.put_thumbnail_async(&path, &img, 1, 1).wait().unwrap();
                    }
                    assert!(cache.get_thumbnail(&path).is_ok());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.get_stats().unwrap().total_entries, 40);
}
