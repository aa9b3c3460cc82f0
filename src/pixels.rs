//! Decoded pixel buffers.
//!
//! The cache stores payloads in one fixed convention: RGBA, 8 bits per
//! channel, rows packed at `width * 4` bytes (always 4-byte aligned).
//! [`PixelBuffer::to_cache_layout`] converts the layouts a decoder may hand
//! over into that convention.

use image::{DynamicImage, RgbaImage};

use crate::error::{CacheError, CacheResult};

/// Bytes per pixel in the cache layout.
pub const CACHE_BYTES_PER_PIXEL: usize = 4;

/// Pixel layouts accepted from decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Red, green, blue, alpha; 8 bits each.
    Rgba8,
    /// Blue, green, red, alpha; 8 bits each.
    Bgra8,
    /// Red, green, blue; 8 bits each.
    Rgb8,
    /// Single 8-bit luminance channel.
    Gray8,
}

impl PixelFormat {
    /// Number of bytes one pixel occupies.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb8 => 3,
            Self::Gray8 => 1,
        }
    }
}

/// A decoded image: dimensions, layout, row stride and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of each pixel.
    pub format: PixelFormat,
    /// Bytes from the start of one row to the start of the next.
    pub stride: usize,
    /// Pixel bytes, `stride * height` long (the last row may be unpadded).
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a tightly packed RGBA buffer.
    #[must_use]
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            stride: width as usize * CACHE_BYTES_PER_PIXEL,
            data,
        }
    }

    /// Whether the buffer already matches the cache layout.
    #[must_use]
    pub fn is_cache_layout(&self) -> bool {
        self.format == PixelFormat::Rgba8
            && self.stride == self.width as usize * CACHE_BYTES_PER_PIXEL
            && self.data.len() == self.stride * self.height as usize
    }

    /// Convert into the cache layout.
    ///
    /// Returns the buffer unchanged when it already matches.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CorruptedData`] when the stride is smaller than a
    /// row or the data is too short for the declared dimensions.
    pub fn to_cache_layout(&self) -> CacheResult<Vec<u8>> {
        if self.is_cache_layout() {
            return Ok(self.data.clone());
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = width * bpp;

        if self.stride < row_bytes {
            return Err(CacheError::CorruptedData(format!(
                "stride {} is smaller than row width {}",
                self.stride, row_bytes
            )));
        }
        let needed = if height == 0 {
            0
        } else {
            self.stride * (height - 1) + row_bytes
        };
        if self.data.len() < needed {
            return Err(CacheError::CorruptedData(format!(
                "pixel buffer holds {} bytes, {} required",
                self.data.len(),
                needed
            )));
        }

        let mut out = Vec::with_capacity(width * height * CACHE_BYTES_PER_PIXEL);
        for row in 0..height {
            let start = row * self.stride;
            let src = &self.data[start..start + row_bytes];
            match self.format {
                PixelFormat::Rgba8 => out.extend_from_slice(src),
                PixelFormat::Bgra8 => {
                    for px in src.chunks_exact(4) {
                        out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                    }
                }
                PixelFormat::Rgb8 => {
                    for px in src.chunks_exact(3) {
                        out.extend_from_slice(&[px[0], px[1], px[2], u8::MAX]);
                    }
                }
                PixelFormat::Gray8 => {
                    for &v in src {
                        out.extend_from_slice(&[v, v, v, u8::MAX]);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Wrap a decoded image, converting it to RGBA.
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::rgba(width, height, rgba.into_raw())
    }

    /// Convert a cache-layout buffer into an `RgbaImage`.
    ///
    /// Returns `None` if the buffer is not in the cache layout.
    #[must_use]
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        if !self.is_cache_layout() {
            return None;
        }
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}
