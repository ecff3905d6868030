//! Thumbnail values and the host bitmap codec interface
//!
//! This crate does NOT decode or encode pixels. Embedded thumbnails are
//! surfaced as they are stored (JPEG stream, uncompressed TIFF strips, or raw
//! RGB pixels), and anything that needs real pixel work goes through a
//! [`BitmapCodec`] supplied by the caller.
//!
//! # Example
//!
//! Host applications implement the `BitmapCodec` trait:
//!
//! ```rust,ignore
//! use meta_io::{BitmapCodec, PixelBuffer, Result};
//!
//! pub struct ImageCrateCodec;
//!
//! impl BitmapCodec for ImageCrateCodec {
//!     fn decode(&self, data: &[u8]) -> Result<PixelBuffer> {
//!         let img = image::load_from_memory(data).map_err(|e| meta_io::Error::Codec(e.to_string()))?;
//!         // ... convert to ARGB pixels
//!     }
//!     // scale() and encode_jpeg() likewise
//! }
//! ```

use crate::error::{Error, Result};

/// Options for thumbnails generated through a bitmap codec
#[derive(Debug, Clone)]
pub struct ThumbnailOptions {
    /// Maximum thumbnail width in pixels
    pub max_width: u32,

    /// Maximum thumbnail height in pixels
    pub max_height: u32,

    /// JPEG quality for output (1-100)
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_width: 160,
            max_height: 120,
            quality: 90,
        }
    }
}

/// Decoded pixels, one ARGB `u32` per pixel in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Result<Self> {
        if pixels.len() as u64 != width as u64 * height as u64 {
            return Err(Error::InvalidFormat(format!(
                "{} pixels for a {}x{} bitmap",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Build from packed 3-byte pixels; `stride` is the byte length of one row
    /// (rows may be padded), `bgr` selects the channel order
    pub fn from_packed(width: u32, height: u32, data: &[u8], stride: usize, bgr: bool) -> Result<Self> {
        let row_len = width as usize * 3;
        if stride < row_len {
            return Err(Error::InvalidFormat(format!("Row stride {} below {} bytes", stride, row_len)));
        }
        let needed = stride * height.saturating_sub(1) as usize + row_len;
        if height > 0 && data.len() < needed {
            return Err(Error::Truncated(format!(
                "bitmap needs {} bytes, found {}",
                needed,
                data.len()
            )));
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height as usize {
            let line = &data[row * stride..row * stride + row_len];
            for px in line.chunks_exact(3) {
                let (r, g, b) = if bgr { (px[2], px[1], px[0]) } else { (px[0], px[1], px[2]) };
                pixels.push(0xFF00_0000 | (r as u32) << 16 | (g as u32) << 8 | b as u32);
            }
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// ARGB pixels
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Packed RGB bytes without row padding
    pub fn to_rgb(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&p| [(p >> 16) as u8, (p >> 8) as u8, p as u8])
            .collect()
    }
}

/// How a thumbnail is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailPayload {
    /// Uncompressed pixels
    Raw(PixelBuffer),
    /// Complete JPEG stream
    Jpeg(Vec<u8>),
    /// Self-contained single-page TIFF
    Tiff(Vec<u8>),
}

/// A thumbnail image with its dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    width: u32,
    height: u32,
    payload: ThumbnailPayload,
}

impl Thumbnail {
    pub fn new(width: u32, height: u32, payload: ThumbnailPayload) -> Self {
        Self { width, height, payload }
    }

    /// Wrap an already encoded JPEG stream
    pub fn jpeg(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(width, height, ThumbnailPayload::Jpeg(data))
    }

    pub fn raw(bitmap: PixelBuffer) -> Self {
        Self::new(bitmap.width(), bitmap.height(), ThumbnailPayload::Raw(bitmap))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn payload(&self) -> &ThumbnailPayload {
        &self.payload
    }

    pub fn into_payload(self) -> ThumbnailPayload {
        self.payload
    }

    /// Short name of the storage format
    pub fn format_name(&self) -> &'static str {
        match self.payload {
            ThumbnailPayload::Raw(_) => "raw",
            ThumbnailPayload::Jpeg(_) => "jpeg",
            ThumbnailPayload::Tiff(_) => "tiff",
        }
    }

    /// The thumbnail as a JPEG stream, encoding through `codec` when needed
    pub fn to_jpeg(&self, codec: Option<&dyn BitmapCodec>, quality: u8) -> Result<Vec<u8>> {
        match &self.payload {
            ThumbnailPayload::Jpeg(data) => Ok(data.clone()),
            ThumbnailPayload::Raw(bitmap) => require_codec(codec)?.encode_jpeg(bitmap, quality),
            ThumbnailPayload::Tiff(data) => {
                let codec = require_codec(codec)?;
                let bitmap = codec.decode(data)?;
                codec.encode_jpeg(&bitmap, quality)
            }
        }
    }
}

/// Pixel operations supplied by the host platform
///
/// The codec is passed explicitly to the operations that need it; nothing in
/// this crate holds a global codec.
pub trait BitmapCodec {
    /// Decode an encoded image (JPEG, TIFF, ...) into pixels
    fn decode(&self, data: &[u8]) -> Result<PixelBuffer>;

    /// Resample to exactly `width` x `height`
    fn scale(&self, bitmap: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer>;

    /// Encode pixels as a baseline JPEG stream
    fn encode_jpeg(&self, bitmap: &PixelBuffer, quality: u8) -> Result<Vec<u8>>;
}

fn require_codec(codec: Option<&dyn BitmapCodec>) -> Result<&dyn BitmapCodec> {
    codec.ok_or_else(|| Error::Codec("a bitmap codec is required to encode this thumbnail".into()))
}

/// Decode `image`, fit it inside the option bounds and encode it as a JPEG thumbnail
pub fn generate_thumbnail(codec: &dyn BitmapCodec, image: &[u8], options: &ThumbnailOptions) -> Result<Thumbnail> {
    let bitmap = codec.decode(image)?;
    let (width, height) = fit_within(bitmap.width(), bitmap.height(), options.max_width, options.max_height);
    let scaled = if (width, height) == (bitmap.width(), bitmap.height()) {
        bitmap
    } else {
        codec.scale(&bitmap, width, height)?
    };
    let data = codec.encode_jpeg(&scaled, options.quality)?;
    Ok(Thumbnail::jpeg(width, height, data))
}

/// Largest size with the same aspect ratio that fits in `max_w` x `max_h`
fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h || width == 0 || height == 0 {
        return (width, height);
    }
    let scale = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_packed_with_padding() {
        // 2x2 BGR with 8-byte rows (2 bytes padding)
        let data = [
            0, 0, 255, 0, 255, 0, 9, 9, //
            255, 0, 0, 1, 2, 3, 9, 9,
        ];
        let bitmap = PixelBuffer::from_packed(2, 2, &data, 8, true).unwrap();
        assert_eq!(bitmap.pixels()[0], 0xFFFF0000);
        assert_eq!(bitmap.pixels()[1], 0xFF00FF00);
        assert_eq!(bitmap.pixels()[2], 0xFF0000FF);
        assert_eq!(bitmap.pixels()[3], 0xFF030201);
        assert_eq!(bitmap.to_rgb()[..3], [255, 0, 0]);
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(640, 480, 160, 120), (160, 120));
        assert_eq!(fit_within(480, 640, 160, 120), (90, 120));
        assert_eq!(fit_within(100, 50, 160, 120), (100, 50));
    }

    #[test]
    fn test_raw_to_jpeg_requires_codec() {
        let thumb = Thumbnail::raw(PixelBuffer::new(1, 1, vec![0xFF000000]).unwrap());
        assert!(matches!(thumb.to_jpeg(None, 90), Err(Error::Codec(_))));
        let jpeg = Thumbnail::jpeg(1, 1, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(jpeg.to_jpeg(None, 90).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
