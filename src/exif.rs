//! EXIF: a self-contained TIFF blob
//!
//! IFD0 describes the primary image and points at the EXIF and GPS
//! directories (the EXIF directory may in turn point at an Interoperability
//! directory). An optional IFD1 describes a thumbnail, stored either as a
//! JPEG stream (`JPEGInterchangeFormat`) or as uncompressed strips.
//!
//! The same model is carried in a JPEG APP1 segment (after `"Exif\0\0"`) and
//! merged into a TIFF page.

use crate::{
    error::{Error, Result},
    formats::{jpeg_io, tiff_io},
    io::ByteOrder,
    thumbnail::{BitmapCodec, Thumbnail, ThumbnailPayload},
    tiff::{
        self, read_ifds, ExifTag, FieldValue, GpsTag, Ifd, InteropTag, Namespace, TagSet, TiffTag,
        FIRST_WRITE_OFFSET,
    },
};
use log::{debug, warn};
use std::io::{Cursor, Seek, SeekFrom, Write};

/// JPEG quality used when a raw thumbnail has to be encoded
const THUMBNAIL_QUALITY: u8 = 90;

/// Tags that tie a TIFF directory to its own image data or metadata blocks;
/// they are never copied between a page and an EXIF model
fn is_container_tag(code: u16) -> bool {
    Namespace::Tiff.is_critical(code)
        || [
            TiffTag::JpegInterchangeFormat,
            TiffTag::JpegInterchangeFormatLength,
            TiffTag::FreeOffsets,
            TiffTag::FreeByteCounts,
            TiffTag::SubIfds,
            TiffTag::Xmp,
            TiffTag::Iptc,
            TiffTag::Photoshop,
            TiffTag::IccProfile,
            TiffTag::ImageSourceData,
        ]
        .iter()
        .any(|t| t.code() == code)
}

/// Overlay `source` onto `target`: fields replace fields, child directories
/// are merged recursively
pub(crate) fn merge_ifd(target: &mut Ifd, source: &Ifd) {
    for field in source.fields() {
        if source.children(field.tag()).is_empty() {
            target.insert_field(field.clone());
        }
    }
    for tag in source.child_tags() {
        let Some(child) = source.child(tag) else { continue };
        match target.child_mut(tag) {
            Some(existing) => merge_ifd(existing, child),
            None => target.add_child(tag, child.clone()),
        }
    }
}

/// The thumbnail directory (IFD1) and its image
#[derive(Debug, Clone, PartialEq)]
pub struct ExifThumbnail {
    /// Descriptive IFD1 fields; pointers and strip layout are rebuilt on write
    ifd: Ifd,
    thumbnail: Thumbnail,
}

impl ExifThumbnail {
    pub fn new(thumbnail: Thumbnail) -> Self {
        Self {
            ifd: Ifd::new(),
            thumbnail,
        }
    }

    pub fn ifd(&self) -> &Ifd {
        &self.ifd
    }

    pub fn thumbnail(&self) -> &Thumbnail {
        &self.thumbnail
    }

    /// Pull the thumbnail image out of an IFD1 read from `data`
    fn read(mut ifd: Ifd, data: &[u8], order: ByteOrder) -> Result<Option<Self>> {
        let interchange = ifd
            .value(TiffTag::JpegInterchangeFormat.code())
            .and_then(FieldValue::first_u32);

        if let Some(offset) = interchange {
            let start = data
                .get(offset as usize..)
                .ok_or_else(|| Error::Truncated(format!("EXIF thumbnail offset {} past end", offset)))?;
            let length = ifd
                .value(TiffTag::JpegInterchangeFormatLength.code())
                .and_then(FieldValue::first_u32);
            let jpeg = match length {
                Some(len) => start
                    .get(..len as usize)
                    .ok_or_else(|| Error::Truncated(format!("EXIF thumbnail ({} bytes)", len)))?
                    .to_vec(),
                None => {
                    let mut out = Vec::new();
                    jpeg_io::copy_jpeg(&mut Cursor::new(start), &mut out)?;
                    out
                }
            };
            ifd.remove_field(TiffTag::JpegInterchangeFormat.code());
            ifd.remove_field(TiffTag::JpegInterchangeFormatLength.code());
            let (width, height) = jpeg_io::jpeg_dimensions(&jpeg).unwrap_or((0, 0));
            debug!("EXIF JPEG thumbnail {}x{}, {} bytes", width, height, jpeg.len());
            return Ok(Some(Self {
                ifd,
                thumbnail: Thumbnail::jpeg(width, height, jpeg),
            }));
        }

        if ifd.has_field(TiffTag::StripOffsets.code()) {
            let width = ifd.value(TiffTag::ImageWidth.code()).and_then(FieldValue::first_u32).unwrap_or(0);
            let height = ifd.value(TiffTag::ImageLength.code()).and_then(FieldValue::first_u32).unwrap_or(0);
            let mut page = ifd.clone();
            let mut out = Cursor::new(Vec::new());
            tiff_io::write_tiff(
                &mut Cursor::new(data),
                &mut out,
                order,
                std::slice::from_mut(&mut page),
                None,
            )?;
            let descriptive: Vec<_> = ifd
                .fields()
                .filter(|f| is_container_tag(f.tag()))
                .map(|f| f.tag())
                .collect();
            for tag in descriptive {
                ifd.remove_field(tag);
            }
            debug!("EXIF TIFF thumbnail {}x{}", width, height);
            return Ok(Some(Self {
                ifd,
                thumbnail: Thumbnail::new(width, height, ThumbnailPayload::Tiff(out.into_inner())),
            }));
        }

        Ok(None)
    }

    /// Write IFD1 and its image at `offset`, linking it from `ifd0`
    fn write<W: Write + Seek>(
        &self,
        writer: &mut W,
        order: ByteOrder,
        ifd0: &Ifd,
        offset: u32,
        codec: Option<&dyn BitmapCodec>,
    ) -> Result<u32> {
        if let ThumbnailPayload::Tiff(bytes) = self.thumbnail.payload() {
            let mut reader = Cursor::new(bytes.as_slice());
            let (source_order, first) = tiff::read_header(&mut reader)?;
            let mut page = read_ifds(&mut reader, source_order, first)?
                .into_iter()
                .next()
                .ok_or_else(|| Error::InvalidFormat("TIFF thumbnail has no IFD".into()))?;
            for field in self.ifd.fields() {
                if !page.has_field(field.tag()) {
                    page.insert_field(field.clone());
                }
            }
            let data_end = tiff_io::copy_page_data(&mut reader, writer, &mut page, offset, None)?;
            let end = page.write(writer, order, data_end)?;
            ifd0.set_next_ifd_offset(writer, order, page.start_offset().unwrap_or(0))?;
            return Ok(end);
        }

        let jpeg = self.thumbnail.to_jpeg(codec, THUMBNAIL_QUALITY)?;
        let mut ifd = self.ifd.clone();
        if !ifd.has_field(TiffTag::Compression.code()) {
            ifd.add_tiff_field(TiffTag::Compression, FieldValue::short(6));
        }
        ifd.add_tiff_field(TiffTag::JpegInterchangeFormat, FieldValue::long(0));
        ifd.add_tiff_field(TiffTag::JpegInterchangeFormatLength, FieldValue::long(jpeg.len() as u32));

        let ifd_end = ifd.write(writer, order, offset)?;
        writer.write_all(&jpeg)?;
        let end = ifd_end + jpeg.len() as u32;

        let pointer = ifd
            .field(TiffTag::JpegInterchangeFormat.code())
            .and_then(|f| f.data_offset())
            .ok_or_else(|| Error::InvalidFormat("thumbnail pointer was not written".into()))?;
        writer.seek(SeekFrom::Start(pointer as u64))?;
        order.write_u32(writer, ifd_end)?;
        ifd0.set_next_ifd_offset(writer, order, ifd.start_offset().unwrap_or(0))?;
        writer.seek(SeekFrom::Start(end as u64))?;
        Ok(end)
    }
}

/// EXIF metadata: IFD0 with its EXIF/GPS/Interop children, plus an optional thumbnail
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exif {
    order: ByteOrder,
    image: Ifd,
    thumbnail: Option<ExifThumbnail>,
    thumbnail_required: bool,
}

impl Exif {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_order(order: ByteOrder) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    /// Parse a TIFF blob (the APP1 body after `"Exif\0\0"`)
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let (order, first) = tiff::read_header(&mut reader)?;
        let mut pages = read_ifds(&mut reader, order, first)?.into_iter();
        let image = pages
            .next()
            .ok_or_else(|| Error::InvalidFormat("EXIF data has no IFD0".into()))?;

        let thumbnail = match pages.next() {
            Some(ifd1) => ExifThumbnail::read(ifd1, data, order).unwrap_or_else(|e| {
                warn!("Ignoring unreadable EXIF thumbnail: {}", e);
                None
            }),
            None => None,
        };

        Ok(Self {
            order,
            image,
            thumbnail,
            thumbnail_required: false,
        })
    }

    /// EXIF view of a TIFF page: its descriptive fields and EXIF/GPS children
    pub fn from_page(page: &Ifd, order: ByteOrder) -> Self {
        let mut image = Ifd::new();
        for field in page.fields() {
            let tag = field.tag();
            if !is_container_tag(tag) && page.children(tag).is_empty() {
                image.insert_field(field.clone());
            }
        }
        for tag in [TiffTag::ExifSubIfd, TiffTag::GpsSubIfd] {
            if let Some(child) = page.child(tag.code()) {
                image.add_child(tag.code(), child.clone());
            }
        }
        Self {
            order,
            image,
            ..Self::default()
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn image_ifd(&self) -> &Ifd {
        &self.image
    }

    pub fn image_ifd_mut(&mut self) -> &mut Ifd {
        &mut self.image
    }

    pub fn exif_ifd(&self) -> Option<&Ifd> {
        self.image.child(TiffTag::ExifSubIfd.code())
    }

    pub fn gps_ifd(&self) -> Option<&Ifd> {
        self.image.child(TiffTag::GpsSubIfd.code())
    }

    pub fn interop_ifd(&self) -> Option<&Ifd> {
        self.exif_ifd()?.child(ExifTag::InteroperabilityOffset.code())
    }

    pub fn set_exif_ifd(&mut self, ifd: Ifd) {
        self.image.add_child(TiffTag::ExifSubIfd.code(), ifd);
    }

    pub fn set_gps_ifd(&mut self, ifd: Ifd) {
        self.image.add_child(TiffTag::GpsSubIfd.code(), ifd);
    }

    pub fn set_image_field(&mut self, tag: TiffTag, value: FieldValue) {
        self.image.add_field(tag.code(), value);
    }

    pub fn set_exif_field(&mut self, tag: ExifTag, value: FieldValue) {
        child_or_insert(&mut self.image, TiffTag::ExifSubIfd.code(), Namespace::Exif).add_field(tag.code(), value);
    }

    pub fn set_gps_field(&mut self, tag: GpsTag, value: FieldValue) {
        child_or_insert(&mut self.image, TiffTag::GpsSubIfd.code(), Namespace::Gps).add_field(tag.code(), value);
    }

    pub fn set_interop_field(&mut self, tag: InteropTag, value: FieldValue) {
        let exif = child_or_insert(&mut self.image, TiffTag::ExifSubIfd.code(), Namespace::Exif);
        child_or_insert(exif, ExifTag::InteroperabilityOffset.code(), Namespace::Interop).add_field(tag.code(), value);
    }

    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref().map(ExifThumbnail::thumbnail)
    }

    pub fn thumbnail_ifd(&self) -> Option<&Ifd> {
        self.thumbnail.as_ref().map(ExifThumbnail::ifd)
    }

    pub fn set_thumbnail(&mut self, thumbnail: Thumbnail) {
        self.thumbnail = Some(ExifThumbnail::new(thumbnail));
    }

    pub fn remove_thumbnail(&mut self) -> Option<Thumbnail> {
        self.thumbnail.take().map(|t| t.thumbnail)
    }

    /// Ask the JPEG writer to generate a thumbnail from the host image when
    /// none is set (requires a bitmap codec)
    pub fn require_thumbnail(&mut self, required: bool) {
        self.thumbnail_required = required;
    }

    pub fn thumbnail_required(&self) -> bool {
        self.thumbnail_required
    }

    /// Overlay `newer` onto this EXIF: its fields win, its thumbnail (if any)
    /// replaces ours
    pub fn merge(&mut self, newer: &Exif) {
        merge_ifd(&mut self.image, &newer.image);
        if newer.thumbnail.is_some() {
            self.thumbnail = newer.thumbnail.clone();
        }
        self.thumbnail_required |= newer.thumbnail_required;
    }

    /// Serialize as a TIFF blob
    pub fn to_bytes(&self, codec: Option<&dyn BitmapCodec>) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        tiff::write_header(&mut out, self.order, FIRST_WRITE_OFFSET)?;
        let mut image = self.image.clone();
        let end = image.write(&mut out, self.order, FIRST_WRITE_OFFSET)?;
        if let Some(thumbnail) = &self.thumbnail {
            thumbnail.write(&mut out, self.order, &image, end, codec)?;
        }
        Ok(out.into_inner())
    }
}

fn child_or_insert(parent: &mut Ifd, tag: u16, namespace: Namespace) -> &mut Ifd {
    if parent.child(tag).is_none() {
        parent.add_child(tag, Ifd::with_namespace(namespace));
    }
    // Inserted above when missing
    match parent.child_mut(tag) {
        Some(child) => child,
        None => unreachable!("child directory {} was just inserted", tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_jpeg, MockCodec};

    fn sample_exif() -> Exif {
        let mut exif = Exif::with_byte_order(ByteOrder::LittleEndian);
        exif.set_image_field(TiffTag::Make, FieldValue::ascii("Acme"));
        exif.set_exif_field(ExifTag::ExposureTime, FieldValue::Rational(vec![(1, 125)]));
        exif.set_interop_field(InteropTag::InteroperabilityIndex, FieldValue::ascii("R98"));
        exif.set_gps_field(GpsTag::LatitudeRef, FieldValue::ascii("N"));
        exif
    }

    #[test]
    fn test_write_then_parse() {
        let exif = sample_exif();
        let bytes = exif.to_bytes(None).unwrap();
        assert_eq!(&bytes[..2], b"II");

        let parsed = Exif::parse(&bytes).unwrap();
        assert_eq!(parsed.byte_order(), ByteOrder::LittleEndian);
        assert_eq!(
            parsed.image_ifd().value(TiffTag::Make.code()).and_then(FieldValue::as_string).as_deref(),
            Some("Acme")
        );
        assert_eq!(
            parsed.exif_ifd().unwrap().value(ExifTag::ExposureTime.code()),
            Some(&FieldValue::Rational(vec![(1, 125)]))
        );
        assert!(parsed.interop_ifd().is_some());
        assert!(parsed.gps_ifd().is_some());
        assert!(parsed.thumbnail().is_none());
    }

    #[test]
    fn test_jpeg_thumbnail_round_trip() {
        let thumb = build_jpeg(&[]);
        let mut exif = sample_exif();
        exif.set_thumbnail(Thumbnail::jpeg(8, 8, thumb.clone()));

        let bytes = exif.to_bytes(None).unwrap();
        let parsed = Exif::parse(&bytes).unwrap();
        let thumbnail = parsed.thumbnail().unwrap();
        assert_eq!(thumbnail.payload(), &ThumbnailPayload::Jpeg(thumb));
        assert_eq!((thumbnail.width(), thumbnail.height()), (8, 8));
    }

    #[test]
    fn test_raw_thumbnail_needs_codec() {
        let bitmap = crate::thumbnail::PixelBuffer::new(1, 1, vec![0xFFFF_FFFF]).unwrap();
        let mut exif = Exif::new();
        exif.set_thumbnail(Thumbnail::raw(bitmap));
        assert!(matches!(exif.to_bytes(None), Err(Error::Codec(_))));

        let bytes = exif.to_bytes(Some(&MockCodec)).unwrap();
        let parsed = Exif::parse(&bytes).unwrap();
        assert_eq!(parsed.thumbnail().unwrap().format_name(), "jpeg");
    }

    #[test]
    fn test_merge_overlays_fields() {
        let mut old = sample_exif();
        let mut newer = Exif::new();
        newer.set_image_field(TiffTag::Make, FieldValue::ascii("Other"));
        newer.set_exif_field(ExifTag::FNumber, FieldValue::Rational(vec![(28, 10)]));

        old.merge(&newer);
        assert_eq!(
            old.image_ifd().value(TiffTag::Make.code()).and_then(FieldValue::as_string).as_deref(),
            Some("Other")
        );
        let exif_ifd = old.exif_ifd().unwrap();
        assert!(exif_ifd.has_field(ExifTag::ExposureTime.code()));
        assert!(exif_ifd.has_field(ExifTag::FNumber.code()));
        assert!(old.interop_ifd().is_some());
    }

    #[test]
    fn test_from_page_skips_structure() {
        let mut page = Ifd::new();
        page.add_tiff_field(TiffTag::ImageWidth, FieldValue::long(10));
        page.add_tiff_field(TiffTag::StripOffsets, FieldValue::long(100));
        page.add_tiff_field(TiffTag::Artist, FieldValue::ascii("me"));
        page.add_child(TiffTag::ExifSubIfd.code(), Ifd::with_namespace(Namespace::Exif));

        let exif = Exif::from_page(&page, ByteOrder::BigEndian);
        assert!(exif.image_ifd().has_field(TiffTag::Artist.code()));
        assert!(!exif.image_ifd().has_field(TiffTag::ImageWidth.code()));
        assert!(!exif.image_ifd().has_field(TiffTag::StripOffsets.code()));
        assert!(exif.exif_ifd().is_some());
    }
}
