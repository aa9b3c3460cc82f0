use std::fs;
use std::path::Path;
use tempfile::tempdir;
use thumbcache::cache::{cache_key_for_path, CacheManager};
use thumbcache::config::CacheConfig;
use thumbcache::error::CacheError;
use thumbcache::pixels::{PixelBuffer, PixelFormat};

fn image(width: u32, height: u32, fill: u8) -> PixelBuffer {
    PixelBuffer::rgba(width, height, vec![fill; (width * height * 4) as usize])
}

fn open_cache(dir: &Path, memory: usize) -> CacheManager {
    let mut config = CacheConfig::with_db_path(dir.join("thumbs.db"));
    config.memory_cache_size = memory;
    let cache = CacheManager::new(config);
    assert!(cache.is_ready());
    cache
}

#[test]
fn test_put_then_get_round_trip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("photo.png");
    fs::write(&source, b"source bytes").unwrap();

    let cache = open_cache(dir.path(), 8);
    let thumb = image(3, 2, 0x7f);
    cache.put_thumbnail(&source, &thumb, 3000, 2000).unwrap();

    let entry = cache.get_thumbnail(&source).unwrap();
    assert_eq!(entry.metadata.width, 3);
    assert_eq!(entry.metadata.height, 2);
    assert_eq!(entry.metadata.original_width, 3000);
    assert_eq!(entry.metadata.original_height, 2000);
    assert_eq!(entry.metadata.source_path, source);
    assert_eq!(entry.data, thumb.data);
    assert!(entry.metadata.source_mtime.is_some());
}

#[test]
fn test_round_trip_survives_memory_clear_and_reopen() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.png");
    fs::write(&source, b"a").unwrap();
    let thumb = image(2, 2, 9);

    {
        let cache = open_cache(dir.path(), 8);
        cache.put_thumbnail(&source, &thumb, 20, 20).unwrap();
        cache.clear_memory_cache();
        assert_eq!(cache.get_thumbnail(&source).unwrap().data, thumb.data);
        cache.shutdown();
    }

    let cache = open_cache(dir.path(), 8);
    assert!(cache.memory_keys().is_empty());
    let entry = cache.get_thumbnail(&source).unwrap();
    assert_eq!(entry.data, thumb.data);
    assert_eq!(cache.memory_keys(), vec![entry.metadata.cache_key.clone()]);
}

#[test]
fn test_clear_memory_keeps_disk_entries() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 8);
    let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("{i}.png"))).collect();
    for p in &paths {
        fs::write(p, b"x").unwrap();
        cache.put_thumbnail(p, &image(1, 1, 1), 1, 1).unwrap();
    }

    cache.clear_memory_cache();
    assert!(cache.memory_keys().is_empty());

    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.memory_entries, 0);
    for p in &paths {
        assert!(cache.has_thumbnail(p).unwrap());
    }
}

#[test]
fn test_memory_tier_keeps_most_recent_only() {
    let dir = tempdir().unwrap();
    let mut config = CacheConfig::with_db_path(dir.path().join("thumbs.db"));
    config.memory_cache_size = 1;
    config.max_entries = 2;
    let cache = CacheManager::new(config);

    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let c = dir.path().join("c.png");
    for p in [&a, &b, &c] {
        fs::write(p, b"img").unwrap();
        cache.put_thumbnail(p, &image(2, 2, 1), 4, 4).unwrap();
    }

    assert_eq!(cache.memory_keys(), vec![cache_key_for_path(&c)]);
    // Limits are only applied by explicit maintenance.
    assert_eq!(cache.get_stats().unwrap().total_entries, 3);
}

#[test]
fn test_lru_eviction_honors_recent_reads() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 2);
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let c = dir.path().join("c.png");
    for p in [&a, &b] {
        fs::write(p, b"img").unwrap();
        cache.put_thumbnail(p, &image(1, 1, 1), 1, 1).unwrap();
    }
    fs::write(&c, b"img").unwrap();

    cache.get_thumbnail(&a).unwrap();
    cache.put_thumbnail(&c, &image(1, 1, 1), 1, 1).unwrap();

    let keys = cache.memory_keys();
    assert_eq!(keys, vec![cache_key_for_path(&c), cache_key_for_path(&a)]);
    // b fell out of memory but is still on disk.
    assert!(cache.has_thumbnail(&b).unwrap());
}

#[test]
fn test_modified_source_misses() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("edit.png");
    fs::write(&source, b"v1").unwrap();

    let cache = open_cache(dir.path(), 8);
    cache.put_thumbnail(&source, &image(1, 1, 1), 1, 1).unwrap();

    let later = filetime::FileTime::from_unix_time(2_000_000_000, 0);
    filetime::set_file_mtime(&source, later).unwrap();

    assert!(matches!(
        cache.get_thumbnail(&source),
        Err(CacheError::NotFound)
    ));
}

#[test]
fn test_bgra_input_is_stored_as_rgba() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("bgra.png");
    fs::write(&source, b"x").unwrap();
    let cache = open_cache(dir.path(), 8);

    let bgra = PixelBuffer {
        width: 1,
        height: 1,
        format: PixelFormat::Bgra8,
        stride: 4,
        data: vec![1, 2, 3, 4],
    };
    cache.put_thumbnail(&source, &bgra, 1, 1).unwrap();
    cache.clear_memory_cache();

    let entry = cache.get_thumbnail(&source).unwrap();
    assert_eq!(entry.data, vec![3, 2, 1, 4]);
    assert_eq!(entry.stride(), 4);
}

#[test]
fn test_stats_track_hits_and_misses() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 8);
    let p = dir.path().join("s.png");
    fs::write(&p, b"x").unwrap();

    assert!(cache.get_thumbnail(&p).unwrap_err().is_miss());
    cache.put_thumbnail(&p, &image(2, 2, 0), 8, 8).unwrap();
    cache.get_thumbnail(&p).unwrap();
    cache.clear_memory_cache();
    cache.get_thumbnail(&p).unwrap();

    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_size_bytes, 16);
    assert!(stats.oldest_entry.is_some());
    assert_eq!(stats.oldest_entry, stats.newest_entry);
}

#[test]
fn test_prefetch_warms_directory_files() {
    let dir = tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir(&photos).unwrap();
    let cache = open_cache(dir.path(), 8);

    let cached: Vec<_> = ["a.png", "b.png"].iter().map(|n| photos.join(n)).collect();
    for p in &cached {
        fs::write(p, b"x").unwrap();
        cache.put_thumbnail(p, &image(1, 1, 2), 1, 1).unwrap();
    }
    fs::write(photos.join("uncached.png"), b"x").unwrap();
    cache.clear_memory_cache();

    let mut seen = Vec::new();
    let warmed = cache.prefetch(&photos, |path, _| seen.push(path.to_path_buf()));
    assert_eq!(warmed, 2);
    seen.sort();
    assert_eq!(seen, cached);
    assert_eq!(cache.memory_keys().len(), 2);

    // Already in memory.
    assert_eq!(cache.prefetch(&photos, |_, _| {}), 0);
}

#[test]
fn test_clear_all_empties_both_tiers() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 8);
    for i in 0..4 {
        let p = dir.path().join(format!("{i}.png"));
        fs::write(&p, b"x").unwrap();
        cache.put_thumbnail(&p, &image(1, 1, 1), 1, 1).unwrap();
    }
    assert_eq!(cache.clear_all().unwrap(), 4);
    let stats = cache.get_stats().unwrap();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.oldest_entry, None);
}

#[test]
fn test_pixels_resembling_compressed_header_read_back() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 8);

    for (name, declared) in [("five.png", 5u64.to_le_bytes()), ("ones.png", [0xFF; 8])] {
        let source = dir.path().join(name);
        fs::write(&source, b"x").unwrap();
        let mut data = b"TCZ1".to_vec();
        data.extend_from_slice(&declared);
        data.resize(4 * 4 * 4, 0x33);
        let img = PixelBuffer::rgba(4, 4, data.clone());

        cache.put_thumbnail(&source, &img, 4, 4).unwrap();
        cache.clear_memory_cache();
        assert_eq!(cache.get_thumbnail(&source).unwrap().data, data);
    }
}
