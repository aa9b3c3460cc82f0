//! Payload compression.
//!
//! Compressed blobs start with a fixed header so a reader can tell them apart
//! from raw pixel payloads without looking at row metadata:
//!
//! ```text
//! +------+----------------------+----------------------+
//! | TCZ1 | uncompressed len u64 | codec frame ...      |
//! +------+----------------------+----------------------+
//!  4 B     8 B little endian
//! ```
//!
//! With compression disabled the blob is the payload itself, byte for byte.
//! Raw pixels may happen to begin with the magic, so a header is only
//! trusted when its declared length matches the length recorded in the row.

use crate::error::{CacheError, CacheResult};

/// Magic bytes that open every compressed blob.
pub const COMPRESSED_MAGIC: &[u8; 4] = b"TCZ1";

const HEADER_LEN: usize = COMPRESSED_MAGIC.len() + 8;

/// Highest level accepted by [`ZstdCodec`].
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Upper bound on the output buffer reserved before decompressing.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// A generic byte compressor.
pub trait Codec: Send + Sync {
    /// Compress `data` at `level`.
    fn compress(&self, data: &[u8], level: i32) -> CacheResult<Vec<u8>>;

    /// Decompress `data`. `size_hint` is the expected output length and
    /// must not be trusted for allocation.
    fn decompress(&self, data: &[u8], size_hint: usize) -> CacheResult<Vec<u8>>;
}

/// Zstandard codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn compress(&self, data: &[u8], level: i32) -> CacheResult<Vec<u8>> {
        zstd::bulk::compress(data, level.clamp(1, MAX_COMPRESSION_LEVEL))
            .map_err(|e| CacheError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], size_hint: usize) -> CacheResult<Vec<u8>> {
        let mut out = Vec::with_capacity(size_hint.min(MAX_PREALLOC));
        zstd::stream::copy_decode(data, &mut out)
            .map_err(|e| CacheError::Compression(e.to_string()))?;
        Ok(out)
    }
}

/// Whether `blob` carries the compressed header.
#[must_use]
pub fn is_compressed(blob: &[u8]) -> bool {
    blob.len() >= HEADER_LEN && blob.starts_with(COMPRESSED_MAGIC)
}

/// Turn a payload into the blob that gets stored.
///
/// A `level` of 0 stores the payload unchanged.
pub fn encode_payload(codec: &dyn Codec, data: &[u8], level: i32) -> CacheResult<Vec<u8>> {
    if level <= 0 {
        return Ok(data.to_vec());
    }
    let frame = codec.compress(data, level)?;
    let mut blob = Vec::with_capacity(HEADER_LEN + frame.len());
    blob.extend_from_slice(COMPRESSED_MAGIC);
    blob.extend_from_slice(&(data.len() as u64).to_le_bytes());
    blob.extend_from_slice(&frame);
    Ok(blob)
}

/// Recover the payload from a stored blob whose row records
/// `expected_len` payload bytes.
///
/// A blob is decompressed only when it carries the header and the declared
/// length equals `expected_len`. A raw payload that merely starts with the
/// magic is returned unchanged, including when its bytes fail to decode but
/// its length is `expected_len`.
///
/// # Errors
///
/// [`CacheError::Compression`] if a genuine frame cannot be decoded or
/// decodes to the wrong length.
pub fn decode_payload(
    codec: &dyn Codec,
    blob: Vec<u8>,
    expected_len: u64,
) -> CacheResult<Vec<u8>> {
    if !is_compressed(&blob) || declared_len(&blob) != expected_len {
        return Ok(blob);
    }
    let raw_fallback = blob.len() as u64 == expected_len;
    let Ok(expected) = usize::try_from(expected_len) else {
        return Ok(blob);
    };

    match codec.decompress(&blob[HEADER_LEN..], expected) {
        Ok(data) if data.len() == expected => Ok(data),
        _ if raw_fallback => Ok(blob),
        Ok(data) => Err(CacheError::Compression(format!(
            "decompressed {} bytes, header declared {}",
            data.len(),
            expected
        ))),
        Err(e) => Err(e),
    }
}

fn declared_len(blob: &[u8]) -> u64 {
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&blob[COMPRESSED_MAGIC.len()..HEADER_LEN]);
    u64::from_le_bytes(len_bytes)
}
