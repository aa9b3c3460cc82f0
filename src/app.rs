//! Command dispatch for the thumbcache binary.

use anyhow::{Context, Result};
use bytesize::ByteSize;
use std::path::Path;

use crate::cache::{CacheManager, CacheStats};
use crate::cli::{CleanupArgs, Cli, Commands, GetArgs, PutArgs};
use crate::config::CacheConfig;
use crate::error::{CacheError, ExitCode};
use crate::logging::init_logging;
use crate::pixels::PixelBuffer;

/// Run a parsed command line.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let mut config = CacheConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(level) = cli.compression_level {
        config.compression_level = level;
    }
    config.validate()?;

    let cache = CacheManager::new(config);
    if !cache.is_ready() {
        return Err(anyhow::Error::new(CacheError::not_ready()).context(format!(
            "Cannot open thumbnail store at {}",
            cache.config().db_path.display()
        )));
    }

    let code = match cli.command {
        Commands::Stats(args) => {
            let stats = cache.get_stats()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            ExitCode::Success
        }
        Commands::Put(args) => put(&cache, &args)?,
        Commands::Get(args) => get(&cache, &args)?,
        Commands::Remove(args) => {
            cache.remove_thumbnail(&args.image)?;
            println!("Removed {}", args.image.display());
            ExitCode::Success
        }
        Commands::Prefetch(args) => {
            let warmed = cache.prefetch(&args.directory, |path, entry| {
                println!(
                    "{} ({}x{})",
                    path.display(),
                    entry.metadata.width,
                    entry.metadata.height
                );
            });
            println!("Prefetched {} thumbnails", warmed);
            ExitCode::Success
        }
        Commands::Cleanup(args) => cleanup(&cache, &args)?,
        Commands::Compact => {
            cache.compact()?;
            println!("Compacted {}", cache.config().db_path.display());
            ExitCode::Success
        }
        Commands::Clear => {
            let removed = cache.clear_all()?;
            println!("Removed {} cached thumbnails", removed);
            ExitCode::Success
        }
    };

    cache.shutdown();
    Ok(code)
}

fn put(cache: &CacheManager, args: &PutArgs) -> Result<ExitCode> {
    let decoded = image::open(&args.image)
        .with_context(|| format!("Failed to decode {}", args.image.display()))?;
    let (original_width, original_height) = (decoded.width(), decoded.height());
    let thumb = decoded.thumbnail(args.size, args.size);
    let buffer = PixelBuffer::from_dynamic(&thumb);

    cache
        .put_thumbnail(&args.image, &buffer, original_width, original_height)
        .with_context(|| format!("Failed to cache {}", args.image.display()))?;
    println!(
        "Cached {} ({}x{} from {}x{})",
        args.image.display(),
        buffer.width,
        buffer.height,
        original_width,
        original_height
    );
    Ok(ExitCode::Success)
}

fn get(cache: &CacheManager, args: &GetArgs) -> Result<ExitCode> {
    let entry = match cache.get_thumbnail(&args.image) {
        Ok(entry) => entry,
        Err(e) if e.is_miss() => {
            println!("No cached thumbnail for {}", args.image.display());
            return Ok(ExitCode::Miss);
        }
        Err(e) => return Err(e.into()),
    };

    let meta = &entry.metadata;
    println!("key:       {}", meta.cache_key);
    println!("source:    {}", meta.source_path.display());
    println!("thumbnail: {}x{}", meta.width, meta.height);
    println!("original:  {}x{}", meta.original_width, meta.original_height);
    println!("size:      {}", ByteSize(meta.data_size));
    println!("cached at: {}", meta.cached_at.to_rfc3339());

    if let Some(output) = &args.output {
        write_png(&entry.to_pixel_buffer(), output)?;
        println!("Wrote {}", output.display());
    }
    Ok(ExitCode::Success)
}

fn write_png(buffer: &PixelBuffer, output: &Path) -> Result<()> {
    let img = buffer
        .to_rgba_image()
        .ok_or_else(|| anyhow::anyhow!("Cached payload does not match its dimensions"))?;
    img.save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

fn cleanup(cache: &CacheManager, args: &CleanupArgs) -> Result<ExitCode> {
    let all = args.run_all();
    if all || args.expired {
        println!("Expired:  {}", cache.cleanup_expired()?);
    }
    if all || args.orphaned {
        println!("Orphaned: {}", cache.cleanup_orphaned()?);
    }
    if all || args.limits {
        println!("Evicted:  {}", cache.enforce_limits()?);
    }
    Ok(ExitCode::Success)
}

fn print_stats(stats: &CacheStats) {
    println!("Entries:   {}", stats.total_entries);
    println!("Size:      {}", ByteSize(stats.total_size_bytes));
    println!("In memory: {}", stats.memory_entries);
    if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
        println!("Oldest:    {}", oldest.to_rfc3339());
        println!("Newest:    {}", newest.to_rfc3339());
    }
    println!(
        "Hit rate:  {:.1}% ({} hits, {} misses)",
        stats.hit_rate() * 100.0,
        stats.hits,
        stats.misses
    );
    println!("Evictions: {}", stats.evictions);
}
