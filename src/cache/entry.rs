//! Cache entry definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::key::digest_hex;
use crate::pixels::{PixelBuffer, CACHE_BYTES_PER_PIXEL};

/// Metadata stored alongside each cached thumbnail.
///
/// A metadata record is only meaningful paired with its payload; the store
/// never keeps one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailMetadata {
    /// Content address (see [`crate::cache::key`]).
    pub cache_key: String,
    /// Path of the source image.
    pub source_path: PathBuf,
    /// Thumbnail width in pixels.
    pub width: u32,
    /// Thumbnail height in pixels.
    pub height: u32,
    /// Source image width, 0 if unknown.
    pub original_width: u32,
    /// Source image height, 0 if unknown.
    pub original_height: u32,
    /// Source modification time, if it could be read.
    pub source_mtime: Option<DateTime<Utc>>,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Size of the uncompressed payload in bytes.
    pub data_size: u64,
    /// SHA-256 of the uncompressed payload, hex encoded.
    pub content_hash: String,
}

/// A cached thumbnail: metadata plus RGBA pixels packed at `width * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailEntry {
    /// Entry metadata.
    pub metadata: ThumbnailMetadata,
    /// Pixel payload.
    pub data: Vec<u8>,
}

impl ThumbnailEntry {
    /// Build an entry from pixels already in the cache layout.
    ///
    /// `cached_at` is set to now; `data_size` and `content_hash` are derived
    /// from `data`.
    #[must_use]
    pub fn new(
        cache_key: String,
        source_path: PathBuf,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Self {
        let metadata = ThumbnailMetadata {
            cache_key,
            source_path,
            width,
            height,
            original_width: 0,
            original_height: 0,
            source_mtime: None,
            cached_at: truncate_millis(Utc::now()),
            data_size: data.len() as u64,
            content_hash: payload_hash(&data),
        };
        Self { metadata, data }
    }

    /// Set the source image dimensions.
    #[must_use]
    pub fn with_original_size(mut self, width: u32, height: u32) -> Self {
        self.metadata.original_width = width;
        self.metadata.original_height = height;
        self
    }

    /// Set the source modification time.
    #[must_use]
    pub fn with_source_mtime(mut self, mtime: Option<DateTime<Utc>>) -> Self {
        self.metadata.source_mtime = mtime.map(truncate_millis);
        self
    }

    /// Override the cache timestamp.
    #[must_use]
    pub fn with_cached_at(mut self, cached_at: DateTime<Utc>) -> Self {
        self.metadata.cached_at = truncate_millis(cached_at);
        self
    }

    /// Whether the entry can be stored: a key, non-zero dimensions and a
    /// non-empty payload.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.metadata.cache_key.is_empty()
            && self.metadata.width > 0
            && self.metadata.height > 0
            && !self.data.is_empty()
    }

    /// Row stride of the payload.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.metadata.width as usize * CACHE_BYTES_PER_PIXEL
    }

    /// View the payload as a pixel buffer.
    #[must_use]
    pub fn to_pixel_buffer(&self) -> PixelBuffer {
        PixelBuffer::rgba(self.metadata.width, self.metadata.height, self.data.clone())
    }
}

/// Drop sub-millisecond precision, matching what the store persists.
#[must_use]
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Hash used for `content_hash`.
#[must_use]
pub fn payload_hash(data: &[u8]) -> String {
    digest_hex(&[data])
}
