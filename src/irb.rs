//! Photoshop Image Resource Blocks (8BIM)
//!
//! An IRB is a sequence of resources:
//! - signature "8BIM" (4)
//! - resource id (2, big-endian)
//! - Pascal name: length byte + bytes, padded so the whole name is even
//! - data size (4, big-endian)
//! - data, padded to even length
//!
//! The block is carried in JPEG APP13 segments (after "Photoshop 3.0\0") and
//! in the TIFF Photoshop tag.

use crate::{
    error::{Error, Result},
    iptc::{self, IptcDataSet},
    thumbnail::{BitmapCodec, PixelBuffer, Thumbnail, ThumbnailPayload},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

pub const SIGNATURE: &[u8; 4] = b"8BIM";

/// Signatures other applications use for the same record layout
const ALTERNATE_SIGNATURES: [&[u8; 4]; 4] = [b"PHUT", b"AgHg", b"DCSR", b"MeSa"];

/// Well-known resource ids
pub mod resource_id {
    pub const RESOLUTION_INFO: u16 = 0x03ED;
    pub const PRINT_FLAGS: u16 = 0x03F3;
    pub const IPTC_NAA: u16 = 0x0404;
    pub const JPEG_QUALITY: u16 = 0x0406;
    pub const GRID_GUIDES: u16 = 0x0408;
    /// Photoshop 4 thumbnail, raw data in BGR order
    pub const THUMBNAIL_RESOURCE_PS4: u16 = 0x0409;
    pub const COPYRIGHT_FLAG: u16 = 0x040A;
    pub const URL: u16 = 0x040B;
    /// Photoshop 5+ thumbnail, raw data in RGB order
    pub const THUMBNAIL_RESOURCE_PS5: u16 = 0x040C;
    pub const GLOBAL_ANGLE: u16 = 0x040D;
    pub const ICC_PROFILE: u16 = 0x040F;
    pub const WATERMARK: u16 = 0x0410;
    pub const ICC_UNTAGGED: u16 = 0x0411;
    pub const DOCUMENT_ID_SEED: u16 = 0x0414;
    pub const GLOBAL_ALTITUDE: u16 = 0x0419;
    pub const SLICES: u16 = 0x041A;
    pub const URL_LIST: u16 = 0x041E;
    pub const VERSION_INFO: u16 = 0x0421;
    pub const EXIF_DATA1: u16 = 0x0422;
    pub const EXIF_DATA3: u16 = 0x0423;
    pub const XMP_METADATA: u16 = 0x0424;
    pub const CAPTION_DIGEST: u16 = 0x0425;
    pub const PRINT_SCALE: u16 = 0x0426;
    pub const PIXEL_ASPECT_RATIO: u16 = 0x0428;
    pub const PRINT_INFO: u16 = 0x043A;
    pub const PRINT_STYLE: u16 = 0x043B;
    pub const CLIPPING_PATH_NAME: u16 = 0x0BB7;
    pub const PRINT_FLAGS_INFO: u16 = 0x2710;
}

/// Human-readable name of a resource id
pub fn resource_name(id: u16) -> &'static str {
    use resource_id::*;
    match id {
        RESOLUTION_INFO => "ResolutionInfo",
        PRINT_FLAGS => "PrintFlags",
        IPTC_NAA => "IPTC-NAA",
        JPEG_QUALITY => "JPEGQuality",
        GRID_GUIDES => "GridAndGuides",
        THUMBNAIL_RESOURCE_PS4 => "ThumbnailResource (PS4)",
        COPYRIGHT_FLAG => "CopyrightFlag",
        URL => "URL",
        THUMBNAIL_RESOURCE_PS5 => "ThumbnailResource",
        GLOBAL_ANGLE => "GlobalAngle",
        ICC_PROFILE => "ICCProfile",
        WATERMARK => "Watermark",
        ICC_UNTAGGED => "ICCUntagged",
        DOCUMENT_ID_SEED => "DocumentIDSeed",
        GLOBAL_ALTITUDE => "GlobalAltitude",
        SLICES => "Slices",
        URL_LIST => "URLList",
        VERSION_INFO => "VersionInfo",
        EXIF_DATA1 => "EXIFData1",
        EXIF_DATA3 => "EXIFData3",
        XMP_METADATA => "XMPMetadata",
        CAPTION_DIGEST => "CaptionDigest",
        PRINT_SCALE => "PrintScale",
        PIXEL_ASPECT_RATIO => "PixelAspectRatio",
        PRINT_INFO => "PrintInfo",
        PRINT_STYLE => "PrintStyle",
        CLIPPING_PATH_NAME => "ClippingPathName",
        PRINT_FLAGS_INFO => "PrintFlagsInfo",
        0x07D0..=0x0BB6 => "PathInfo",
        _ => "Unknown",
    }
}

/// One 8BIM resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResource {
    id: u16,
    name: Vec<u8>,
    data: Vec<u8>,
}

impl ImageResource {
    pub fn new(id: u16, name: &str, data: Vec<u8>) -> Self {
        let mut name = name.as_bytes().to_vec();
        name.truncate(255);
        Self { id, name, data }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(SIGNATURE)?;
        writer.write_u16::<BigEndian>(self.id)?;
        writer.write_u8(self.name.len() as u8)?;
        writer.write_all(&self.name)?;
        if self.name.len() % 2 == 0 {
            writer.write_u8(0)?;
        }
        writer.write_u32::<BigEndian>(self.data.len() as u32)?;
        writer.write_all(&self.data)?;
        if self.data.len() % 2 == 1 {
            writer.write_u8(0)?;
        }
        Ok(())
    }
}

/// A keyed collection of 8BIM resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Irb {
    resources: BTreeMap<u16, ImageResource>,
}

impl Irb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a resource block; a later resource with a repeated id wins
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut irb = Irb::new();
        let mut cursor = Cursor::new(data);
        // Smallest record: signature, id, empty padded name, size
        const MIN_RECORD: usize = 4 + 2 + 2 + 4;

        while data.len() - cursor.position() as usize >= MIN_RECORD {
            let start = cursor.position();
            let mut signature = [0u8; 4];
            cursor.read_exact(&mut signature)?;
            if &signature != SIGNATURE && !ALTERNATE_SIGNATURES.contains(&&signature) {
                if irb.resources.is_empty() {
                    return Err(Error::InvalidFormat(format!(
                        "Not an image resource block (signature {:?})",
                        String::from_utf8_lossy(&signature)
                    )));
                }
                warn!("Stray bytes after image resources at offset {}", start);
                return Ok(irb);
            }

            let id = cursor.read_u16::<BigEndian>()?;
            let name_len = cursor.read_u8()? as usize;
            let mut name = vec![0u8; name_len];
            cursor.read_exact(&mut name)?;
            if (name_len + 1) % 2 == 1 {
                cursor.read_u8()?;
            }

            let size = cursor.read_u32::<BigEndian>()? as usize;
            let remaining = data.len() - cursor.position() as usize;
            if size > remaining {
                return Err(Error::Truncated(format!(
                    "8BIM 0x{:04X} declares {} bytes, {} left",
                    id, size, remaining
                )));
            }
            let mut value = vec![0u8; size];
            cursor.read_exact(&mut value)?;
            if size % 2 == 1 && (cursor.position() as usize) < data.len() {
                cursor.read_u8()?;
            }

            debug!("8BIM 0x{:04X} {} ({} bytes)", id, resource_name(id), size);
            irb.resources.insert(id, ImageResource { id, name, data: value });
        }

        if (cursor.position() as usize) < data.len() {
            let tail = &data[cursor.position() as usize..];
            if tail.iter().any(|&b| b != 0) {
                warn!("{} stray bytes after image resources", tail.len());
            }
        }
        Ok(irb)
    }

    /// Serialize every resource in id order
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for resource in self.resources.values() {
            resource.write(&mut out)?;
        }
        Ok(out)
    }

    pub fn get(&self, id: u16) -> Option<&ImageResource> {
        self.resources.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.resources.contains_key(&id)
    }

    /// Insert or replace a resource
    pub fn insert(&mut self, resource: ImageResource) -> Option<ImageResource> {
        self.resources.insert(resource.id, resource)
    }

    pub fn remove(&mut self, id: u16) -> Option<ImageResource> {
        self.resources.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageResource> {
        self.resources.values()
    }

    /// Upsert `resources`; with `update == false` everything else is dropped first
    pub fn merge(&mut self, resources: &[ImageResource], update: bool) {
        if !update {
            self.resources.clear();
        }
        for resource in resources {
            self.insert(resource.clone());
        }
        self.normalize_thumbnails();
    }

    /// Keep a single thumbnail resource, preferring the Photoshop 5 one
    pub fn normalize_thumbnails(&mut self) {
        if self.contains(resource_id::THUMBNAIL_RESOURCE_PS4) && self.contains(resource_id::THUMBNAIL_RESOURCE_PS5) {
            self.remove(resource_id::THUMBNAIL_RESOURCE_PS4);
        }
    }

    /// IPTC data sets stored in the IPTC-NAA resource
    pub fn iptc(&self) -> Result<Vec<IptcDataSet>> {
        match self.get(resource_id::IPTC_NAA) {
            Some(resource) => iptc::parse(resource.data()),
            None => Ok(Vec::new()),
        }
    }

    /// The thumbnail resource, if any
    pub fn thumbnail_resource(&self) -> Result<Option<ThumbnailResource>> {
        let resource = self
            .get(resource_id::THUMBNAIL_RESOURCE_PS5)
            .or_else(|| self.get(resource_id::THUMBNAIL_RESOURCE_PS4));
        resource
            .map(|r| ThumbnailResource::parse(r.id(), r.data()))
            .transpose()
    }
}

/// Storage format of a thumbnail resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailFormat {
    /// kRawRGB: packed, row-padded pixels
    Raw = 0,
    /// kJpegRGB: an embedded JPEG stream
    Jpeg = 1,
}

/// Decoded thumbnail resource (ids 0x0409 and 0x040C)
///
/// Layout: format, width, height, padded row bytes, total size, compressed
/// size (all u32), bits per pixel and planes (u16), then the image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailResource {
    id: u16,
    format: ThumbnailFormat,
    width: u32,
    height: u32,
    row_bytes: u32,
    total_size: u32,
    compressed_size: u32,
    bits_per_pixel: u16,
    planes: u16,
    data: Vec<u8>,
}

impl ThumbnailResource {
    /// Size of the fixed header
    pub const HEADER_LEN: usize = 28;

    /// Name written for thumbnail resources created by this crate
    pub const RESOURCE_NAME: &'static str = "THUMBNAIL_RESOURCE";

    pub fn parse(id: u16, data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(Error::Truncated(format!(
                "thumbnail resource header needs {} bytes, found {}",
                Self::HEADER_LEN,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let format = match cursor.read_u32::<BigEndian>()? {
            0 => ThumbnailFormat::Raw,
            1 => ThumbnailFormat::Jpeg,
            other => {
                return Err(Error::InvalidFormat(format!("Unknown thumbnail format {}", other)));
            }
        };
        let width = cursor.read_u32::<BigEndian>()?;
        let height = cursor.read_u32::<BigEndian>()?;
        let row_bytes = cursor.read_u32::<BigEndian>()?;
        let total_size = cursor.read_u32::<BigEndian>()?;
        let compressed_size = cursor.read_u32::<BigEndian>()?;
        let bits_per_pixel = cursor.read_u16::<BigEndian>()?;
        let planes = cursor.read_u16::<BigEndian>()?;

        let body = &data[Self::HEADER_LEN..];
        let wanted = match format {
            ThumbnailFormat::Jpeg => compressed_size as usize,
            ThumbnailFormat::Raw => total_size as usize,
        };
        if wanted > body.len() {
            warn!(
                "Thumbnail resource declares {} bytes but holds {}",
                wanted,
                body.len()
            );
        }
        let data = body[..wanted.min(body.len())].to_vec();

        Ok(Self {
            id,
            format,
            width,
            height,
            row_bytes,
            total_size,
            compressed_size,
            bits_per_pixel,
            planes,
            data,
        })
    }

    /// JPEG-format resource from an encoded stream
    ///
    /// Fails when the 24-bit row size, the total size or the stream length
    /// does not fit the resource's 32-bit header fields.
    pub fn from_jpeg(id: u16, width: u32, height: u32, jpeg: Vec<u8>) -> Result<Self> {
        let fit = |size: u64| {
            u32::try_from(size).map_err(|_| Error::DataTooLarge {
                size: size as usize,
                max: u32::MAX as usize,
            })
        };
        let row_bytes = (u64::from(width) * 24 + 31) / 32 * 4;
        let total_size = fit(row_bytes * u64::from(height))?;
        Ok(Self {
            id,
            format: ThumbnailFormat::Jpeg,
            width,
            height,
            row_bytes: fit(row_bytes)?,
            total_size,
            compressed_size: fit(jpeg.len() as u64)?,
            bits_per_pixel: 24,
            planes: 1,
            data: jpeg,
        })
    }

    /// JPEG-format resource from any thumbnail, encoding through `codec` if needed
    pub fn from_thumbnail(
        id: u16,
        thumbnail: &Thumbnail,
        codec: Option<&dyn BitmapCodec>,
        quality: u8,
    ) -> Result<Self> {
        let jpeg = thumbnail.to_jpeg(codec, quality)?;
        Self::from_jpeg(id, thumbnail.width(), thumbnail.height(), jpeg)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn format(&self) -> ThumbnailFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert into a caller-facing thumbnail
    pub fn thumbnail(&self) -> Result<Thumbnail> {
        match self.format {
            ThumbnailFormat::Jpeg => Ok(Thumbnail::jpeg(self.width, self.height, self.data.clone())),
            ThumbnailFormat::Raw => {
                let stride = if self.row_bytes > 0 {
                    self.row_bytes as usize
                } else {
                    self.width as usize * 3
                };
                let bgr = self.id == resource_id::THUMBNAIL_RESOURCE_PS4;
                let bitmap = PixelBuffer::from_packed(self.width, self.height, &self.data, stride, bgr)?;
                Ok(Thumbnail::new(self.width, self.height, ThumbnailPayload::Raw(bitmap)))
            }
        }
    }

    /// Encode as an 8BIM resource
    pub fn to_resource(&self) -> Result<ImageResource> {
        let mut data = Vec::with_capacity(Self::HEADER_LEN + self.data.len());
        data.write_u32::<BigEndian>(self.format as u32)?;
        data.write_u32::<BigEndian>(self.width)?;
        data.write_u32::<BigEndian>(self.height)?;
        data.write_u32::<BigEndian>(self.row_bytes)?;
        data.write_u32::<BigEndian>(self.total_size)?;
        data.write_u32::<BigEndian>(self.compressed_size)?;
        data.write_u16::<BigEndian>(self.bits_per_pixel)?;
        data.write_u16::<BigEndian>(self.planes)?;
        data.extend_from_slice(&self.data);
        Ok(ImageResource::new(self.id, Self::RESOURCE_NAME, data))
    }
}
