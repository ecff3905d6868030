//! TIFF container I/O implementation
//!
//! Every write re-lays the whole file out: each page's strips (or tiles) and
//! legacy JPEG tables are copied first, then its directory, and only then is
//! the previous page's next-IFD pointer patched to point at it.

use crate::{
    error::{Error, Result},
    exif::{merge_ifd, Exif},
    formats::{jpeg_io, Container, ContainerIO},
    io::ByteOrder,
    iptc::{self, IptcDataSet},
    irb::{resource_id, ImageResource, Irb, ThumbnailResource},
    metadata::{Metadata, MetadataKind, MetadataRegistry, StructuredValue},
    thumbnail::{BitmapCodec, Thumbnail, ThumbnailOptions},
    tiff::{self, read_ifds, FieldValue, Ifd, Namespace, TagSet, TiffTag, FIRST_WRITE_OFFSET},
    xmp::Xmp,
};
use log::{debug, info, warn};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// SOFTWARE value written into every rewritten TIFF
pub const DEFAULT_SOFTWARE: &str = concat!("meta-io ", env!("CARGO_PKG_VERSION"));

/// Size of one JPEG quantization table referenced by `JPEGQTables`
const QUANTIZATION_TABLE_LEN: u32 = 64;

/// TIFF container I/O implementation
pub struct TiffIO<'c> {
    codec: Option<&'c dyn BitmapCodec>,
    software: String,
    thumbnail_options: ThumbnailOptions,
}

impl<'c> TiffIO<'c> {
    pub fn new() -> Self {
        Self {
            codec: None,
            software: DEFAULT_SOFTWARE.to_string(),
            thumbnail_options: ThumbnailOptions::default(),
        }
    }

    /// Use `codec` when a thumbnail has to be encoded
    pub fn with_codec(mut self, codec: &'c dyn BitmapCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Override the SOFTWARE string written into IFD0 of every page
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = software.into();
        self
    }

    pub fn with_thumbnail_options(mut self, options: ThumbnailOptions) -> Self {
        self.thumbnail_options = options;
        self
    }

    pub fn software(&self) -> &str {
        &self.software
    }

    /// Byte order and first-IFD offset
    pub fn read_header<R: Read>(&self, source: &mut R) -> Result<(ByteOrder, u32)> {
        tiff::read_header(source)
    }

    /// All top-level directories (pages) of the file
    pub fn read_pages<R: Read + Seek>(&self, source: &mut R) -> Result<(ByteOrder, Vec<Ifd>)> {
        source.seek(SeekFrom::Start(0))?;
        let (order, first) = self.read_header(source)?;
        let pages = read_ifds(source, order, first)?;
        if pages.is_empty() {
            return Err(Error::InvalidFormat("TIFF has no IFD".into()));
        }
        Ok((order, pages))
    }

    /// Write a complete TIFF made of `pages`, pulling image data from `source`
    pub fn copy_pages<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        order: ByteOrder,
        pages: &mut [Ifd],
    ) -> Result<u32> {
        write_tiff(source, writer, order, pages, Some(&self.software))
    }

    /// Copy one page's image data to `offset` and fix up its pointers
    pub fn copy_page_data<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: &mut Ifd,
        offset: u32,
    ) -> Result<u32> {
        copy_page_data(source, writer, page, offset, Some(&self.software))
    }

    pub fn bytes_to_read(&self, page: &Ifd) -> Option<Vec<u32>> {
        bytes_to_read(page)
    }

    /// Read, edit one page in memory, then rewrite the whole file
    ///
    /// The edit runs before any output byte is written.
    fn edit_page<R, W, F>(&self, source: &mut R, writer: &mut W, page: usize, edit: F) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
        F: FnOnce(&mut Ifd, ByteOrder) -> Result<()>,
    {
        let (order, mut pages) = self.read_pages(source)?;
        let count = pages.len();
        let target = pages
            .get_mut(page)
            .ok_or(Error::PageOutOfRange { page, pages: count })?;
        edit(target, order)?;
        self.copy_pages(source, writer, order, &mut pages)?;
        Ok(())
    }

    /// Store the comments in IMAGE_DESCRIPTION, each NUL-terminated
    pub fn insert_comments<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        comments: &[String],
    ) -> Result<()> {
        let mut text = Vec::new();
        for comment in comments {
            text.extend_from_slice(comment.as_bytes());
            text.push(0);
        }
        self.edit_page(source, writer, page, |target, _| {
            target.add_tiff_field(TiffTag::ImageDescription, FieldValue::Ascii(text));
            Ok(())
        })
    }

    /// Merge EXIF into a page
    ///
    /// Image-level fields are set on the page itself. The EXIF and GPS
    /// directories are merged into the existing ones when `update` is set,
    /// otherwise they replace them.
    pub fn insert_exif<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        exif: &Exif,
        update: bool,
    ) -> Result<()> {
        self.edit_page(source, writer, page, |target, _| {
            let image = exif.image_ifd();
            check_critical_tags(target, image)?;
            for field in image.fields() {
                if image.children(field.tag()).is_empty() {
                    target.insert_field(field.clone());
                }
            }
            for tag in [TiffTag::ExifSubIfd, TiffTag::GpsSubIfd] {
                let Some(child) = image.child(tag.code()) else {
                    continue;
                };
                match target.child_mut(tag.code()) {
                    Some(existing) if update => merge_ifd(existing, child),
                    _ => target.add_child(tag.code(), child.clone()),
                }
            }
            if exif.thumbnail().is_some() {
                debug!("EXIF thumbnail is not carried into TIFF pages");
            }
            Ok(())
        })
    }

    pub fn insert_icc_profile<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        profile: &[u8],
    ) -> Result<()> {
        self.edit_page(source, writer, page, |target, _| {
            target.add_tiff_field(TiffTag::IccProfile, FieldValue::Undefined(profile.to_vec()));
            Ok(())
        })
    }

    pub fn insert_xmp<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        xmp: &Xmp,
    ) -> Result<()> {
        self.edit_page(source, writer, page, |target, _| {
            target.add_tiff_field(TiffTag::Xmp, FieldValue::Undefined(xmp.merged_packet()?));
            Ok(())
        })
    }

    /// Write IPTC into the IPTC tag
    ///
    /// Any IPTC-NAA resource is taken out of the Photoshop IRB so the data
    /// lives in one place; with `update` its data sets (and those of the old
    /// IPTC tag) are merged with `sets`.
    pub fn insert_iptc<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        sets: &[IptcDataSet],
        update: bool,
    ) -> Result<()> {
        self.edit_page(source, writer, page, |target, order| {
            let mut old = Vec::new();
            if let Some(field) = target.remove_field(TiffTag::Iptc.code()) {
                if update {
                    old.extend(iptc::parse(&field.value().encode(order)?)?);
                }
            }
            if let Some(mut irb) = page_irb(target)? {
                if let Some(resource) = irb.remove(resource_id::IPTC_NAA) {
                    if update {
                        old.extend(iptc::parse(resource.data())?);
                    }
                    set_page_irb(target, &irb)?;
                }
            }

            let merged = if update {
                iptc::merge(&old, sets)
            } else {
                iptc::merge(&[], sets)
            };
            target.add_tiff_field(TiffTag::Iptc, FieldValue::Undefined(iptc::to_bytes(&merged)?));
            Ok(())
        })
    }

    /// Write resources into the Photoshop tag, upserting into the existing
    /// IRB when `update` is set
    pub fn insert_irb<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        resources: &[ImageResource],
        update: bool,
    ) -> Result<()> {
        self.edit_page(source, writer, page, |target, _| {
            let mut irb = if update {
                page_irb(target)?.unwrap_or_default()
            } else {
                Irb::new()
            };
            irb.merge(resources, update);
            set_page_irb(target, &irb)
        })
    }

    /// Store a thumbnail as the IRB thumbnail resource
    pub fn insert_thumbnail<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        page: usize,
        thumbnail: &Thumbnail,
    ) -> Result<()> {
        let resource = ThumbnailResource::from_thumbnail(
            resource_id::THUMBNAIL_RESOURCE_PS5,
            thumbnail,
            self.codec,
            self.thumbnail_options.quality,
        )?
        .to_resource()?;
        self.insert_irb(source, writer, page, &[resource], true)
    }

    /// Metadata carried by one page
    pub fn read_metadata<R: Read + Seek>(&self, source: &mut R, page: usize) -> Result<MetadataRegistry> {
        let (order, pages) = self.read_pages(source)?;
        let count = pages.len();
        let page = pages
            .get(page)
            .ok_or(Error::PageOutOfRange { page, pages: count })?;
        page_metadata(page, order)
    }

    /// Remove the given kinds from every page, returning what was removed
    pub fn remove_metadata<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        kinds: &[MetadataKind],
    ) -> Result<MetadataRegistry> {
        let (order, mut pages) = self.read_pages(source)?;
        let mut removed = MetadataRegistry::new();
        for page in pages.iter_mut() {
            strip_page(page, order, kinds, &mut removed)?;
        }
        self.copy_pages(source, writer, order, &mut pages)?;
        info!("Removed {} metadata kinds from {} pages", removed.len(), pages.len());
        Ok(removed)
    }

    /// Keep only the pages at `indices`, in file order
    ///
    /// Out-of-range indices are ignored; when none is valid every page is
    /// kept. PAGE_NUMBER is rewritten on the kept pages. Returns the number of
    /// pages written.
    pub fn retain_pages<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        indices: &[usize],
    ) -> Result<usize> {
        let (order, pages) = self.read_pages(source)?;
        let total = pages.len();
        let mut keep: Vec<usize> = indices.iter().copied().filter(|&i| i < total).collect();
        keep.sort_unstable();
        keep.dedup();
        if keep.is_empty() {
            warn!("No valid page index in {:?}, keeping all {} pages", indices, total);
            keep = (0..total).collect();
        }

        let mut retained: Vec<Ifd> = pages
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.binary_search(i).is_ok())
            .map(|(_, page)| page)
            .collect();
        let kept = retained.len();
        for (index, page) in retained.iter_mut().enumerate() {
            page.add_tiff_field(TiffTag::PageNumber, FieldValue::Short(vec![index as u16, kept as u16]));
        }

        self.copy_pages(source, writer, order, &mut retained)?;
        debug!("Retained {} of {} pages", kept, total);
        Ok(kept)
    }

    /// Keep pages `start..=end`; `end` is clamped to the last page
    pub fn retain_page_range<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        start: usize,
        end: usize,
    ) -> Result<usize> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        let indices: Vec<usize> = (start..=end).collect();
        self.retain_pages(source, writer, &indices)
    }

    pub fn extract_icc_profile<R: Read + Seek>(&self, source: &mut R, page: usize) -> Result<Option<Vec<u8>>> {
        let (_, pages) = self.read_pages(source)?;
        let count = pages.len();
        let page = pages
            .get(page)
            .ok_or(Error::PageOutOfRange { page, pages: count })?;
        Ok(page
            .value(TiffTag::IccProfile.code())
            .and_then(FieldValue::as_bytes)
            .map(<[u8]>::to_vec))
    }

    /// Thumbnail from the page's IRB thumbnail resource
    pub fn extract_thumbnail<R: Read + Seek>(&self, source: &mut R, page: usize) -> Result<Option<Thumbnail>> {
        let (_, pages) = self.read_pages(source)?;
        let count = pages.len();
        let page = pages
            .get(page)
            .ok_or(Error::PageOutOfRange { page, pages: count })?;
        match page_irb(page)? {
            Some(irb) => irb.thumbnail_resource()?.map(|r| r.thumbnail()).transpose(),
            None => Ok(None),
        }
    }
}

impl Default for TiffIO<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for TiffIO<'_> {
    fn container_type() -> Container {
        Container::Tiff
    }

    fn extensions() -> &'static [&'static str] {
        &["tif", "tiff"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/tiff"]
    }

    fn detect(header: &[u8]) -> Option<Container> {
        match header.get(..4)? {
            [b'I', b'I', 0x2A, 0x00] | [b'M', b'M', 0x00, 0x2A] => Some(Container::Tiff),
            _ => None,
        }
    }

    fn read_metadata<R: Read + Seek>(&self, source: &mut R) -> Result<MetadataRegistry> {
        TiffIO::read_metadata(self, source, 0)
    }

    fn remove_metadata<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        kinds: &[MetadataKind],
    ) -> Result<MetadataRegistry> {
        TiffIO::remove_metadata(self, source, writer, kinds)
    }

    fn insert_comments<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        comments: &[String],
    ) -> Result<()> {
        TiffIO::insert_comments(self, source, writer, 0, comments)
    }

    fn insert_exif<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        exif: &Exif,
        update: bool,
    ) -> Result<()> {
        TiffIO::insert_exif(self, source, writer, 0, exif, update)
    }

    fn insert_icc_profile<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        profile: &[u8],
    ) -> Result<()> {
        TiffIO::insert_icc_profile(self, source, writer, 0, profile)
    }

    fn insert_iptc<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        sets: &[IptcDataSet],
        update: bool,
    ) -> Result<()> {
        TiffIO::insert_iptc(self, source, writer, 0, sets, update)
    }

    fn insert_irb<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        resources: &[ImageResource],
        update: bool,
    ) -> Result<()> {
        TiffIO::insert_irb(self, source, writer, 0, resources, update)
    }

    fn insert_xmp<R: Read + Seek, W: Write + Seek>(&self, source: &mut R, writer: &mut W, xmp: &Xmp) -> Result<()> {
        TiffIO::insert_xmp(self, source, writer, 0, xmp)
    }

    fn extract_icc_profile<R: Read + Seek>(&self, source: &mut R) -> Result<Option<Vec<u8>>> {
        TiffIO::extract_icc_profile(self, source, 0)
    }
}

/// Same value, ignoring the integer width it is stored with
fn same_value(a: &FieldValue, b: &FieldValue) -> bool {
    match (a.as_u32s(), b.as_u32s()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Reject structure-critical fields the page already has with another value
fn check_critical_tags(target: &Ifd, incoming: &Ifd) -> Result<()> {
    for field in incoming.fields() {
        let code = field.tag();
        if !Namespace::Tiff.is_critical(code) {
            continue;
        }
        let Some(existing) = target.value(code) else {
            continue;
        };
        if !same_value(existing, field.value()) {
            return Err(Error::CriticalTagConflict {
                tag: Namespace::Tiff.tag_name(code).unwrap_or("Unknown"),
                code,
            });
        }
    }
    Ok(())
}

fn page_irb(page: &Ifd) -> Result<Option<Irb>> {
    page.value(TiffTag::Photoshop.code())
        .and_then(FieldValue::as_bytes)
        .map(Irb::parse)
        .transpose()
}

/// Store `irb` in the Photoshop tag, dropping the tag when it is empty
fn set_page_irb(page: &mut Ifd, irb: &Irb) -> Result<()> {
    if irb.is_empty() {
        page.remove_field(TiffTag::Photoshop.code());
    } else {
        page.add_tiff_field(TiffTag::Photoshop, FieldValue::Undefined(irb.to_bytes()?));
    }
    Ok(())
}

fn tag_bytes(page: &Ifd, tag: TiffTag, order: ByteOrder) -> Result<Option<Vec<u8>>> {
    page.value(tag.code()).map(|value| value.encode(order)).transpose()
}

fn page_metadata(page: &Ifd, order: ByteOrder) -> Result<MetadataRegistry> {
    let mut registry = MetadataRegistry::new();

    if let Some(profile) = tag_bytes(page, TiffTag::IccProfile, order)? {
        registry.insert(Metadata::new(MetadataKind::IccProfile, profile));
    }
    if let Some(xmp) = tag_bytes(page, TiffTag::Xmp, order)? {
        registry.insert(Metadata::new(MetadataKind::Xmp, xmp));
    }

    let mut iptc_bytes = Vec::new();
    if let Some(raw) = tag_bytes(page, TiffTag::Photoshop, order)? {
        match Irb::parse(&raw) {
            Ok(irb) => {
                if let Some(resource) = irb.get(resource_id::IPTC_NAA) {
                    iptc_bytes.extend_from_slice(resource.data());
                }
                registry.insert(Metadata::with_value(
                    MetadataKind::PhotoshopIrb,
                    raw,
                    StructuredValue::PhotoshopIrb(irb),
                ));
            }
            Err(e) => warn!("Ignoring unreadable Photoshop IRB: {}", e),
        }
    }
    if let Some(raw) = tag_bytes(page, TiffTag::Iptc, order)? {
        iptc_bytes.extend_from_slice(&raw);
    }
    if !iptc_bytes.is_empty() {
        registry.insert(Metadata::new(MetadataKind::Iptc, iptc_bytes));
    }

    if page.child(TiffTag::ExifSubIfd.code()).is_some() {
        let exif = Exif::from_page(page, order);
        let raw = exif.to_bytes(None)?;
        registry.insert(Metadata::with_value(MetadataKind::Exif, raw, StructuredValue::Exif(exif)));
    }

    if let Some(description) = page.value(TiffTag::ImageDescription.code()).and_then(FieldValue::as_bytes) {
        registry.insert(Metadata::new(MetadataKind::Comment, description.to_vec()));
    }

    debug!("Page metadata: {:?}", registry.kinds().collect::<Vec<_>>());
    Ok(registry)
}

/// Remove `kinds` from one page, recording the first removal of each kind
fn strip_page(page: &mut Ifd, order: ByteOrder, kinds: &[MetadataKind], removed: &mut MetadataRegistry) -> Result<()> {
    let mut irb = page_irb(page)?;
    let mut irb_changed = false;

    let take_tag = |page: &mut Ifd, tag: TiffTag, kind: MetadataKind, removed: &mut MetadataRegistry| -> Result<()> {
        if let Some(field) = page.remove_field(tag.code()) {
            if !removed.contains(kind) {
                removed.insert(Metadata::new(kind, field.value().encode(order)?));
            }
        }
        Ok(())
    };

    for &kind in kinds {
        let mirrored: &[u16] = match kind {
            MetadataKind::Xmp => {
                take_tag(page, TiffTag::Xmp, kind, removed)?;
                &[resource_id::XMP_METADATA]
            }
            MetadataKind::Iptc => {
                take_tag(page, TiffTag::Iptc, kind, removed)?;
                &[resource_id::IPTC_NAA]
            }
            MetadataKind::IccProfile => {
                take_tag(page, TiffTag::IccProfile, kind, removed)?;
                &[resource_id::ICC_PROFILE]
            }
            MetadataKind::PhotoshopIrb => {
                take_tag(page, TiffTag::Photoshop, kind, removed)?;
                irb = None;
                &[]
            }
            MetadataKind::Exif => {
                if page.child(TiffTag::ExifSubIfd.code()).is_some() && !removed.contains(kind) {
                    let exif = Exif::from_page(page, order);
                    let raw = exif.to_bytes(None)?;
                    removed.insert(Metadata::with_value(kind, raw, StructuredValue::Exif(exif)));
                }
                page.remove_child(TiffTag::ExifSubIfd.code());
                page.remove_child(TiffTag::GpsSubIfd.code());
                &[resource_id::EXIF_DATA1, resource_id::EXIF_DATA3]
            }
            MetadataKind::Comment => {
                take_tag(page, TiffTag::ImageDescription, kind, removed)?;
                &[]
            }
            _ => &[],
        };

        if let Some(irb) = irb.as_mut() {
            for &id in mirrored {
                irb_changed |= irb.remove(id).is_some();
            }
        }
    }

    if irb_changed {
        if let Some(irb) = &irb {
            set_page_irb(page, irb)?;
        }
    }
    Ok(())
}

/// Write a TIFF header followed by `pages`, with IFD0 at the first write offset
pub fn write_tiff<R: Read + Seek, W: Write + Seek>(
    source: &mut R,
    writer: &mut W,
    order: ByteOrder,
    pages: &mut [Ifd],
    software: Option<&str>,
) -> Result<u32> {
    writer.seek(SeekFrom::Start(0))?;
    tiff::write_header(writer, order, 0)?;
    let end = copy_pages(source, writer, order, pages, FIRST_WRITE_OFFSET, software)?;

    let first = pages.first().and_then(Ifd::start_offset).unwrap_or(0);
    writer.seek(SeekFrom::Start(4))?;
    order.write_u32(writer, first)?;
    writer.seek(SeekFrom::Start(end as u64))?;
    Ok(end)
}

/// Write every page (data then directory) from `offset`, linking each
/// directory from its predecessor once its position is known
pub fn copy_pages<R: Read + Seek, W: Write + Seek>(
    source: &mut R,
    writer: &mut W,
    order: ByteOrder,
    pages: &mut [Ifd],
    offset: u32,
    software: Option<&str>,
) -> Result<u32> {
    let mut offset = offset;
    for index in 0..pages.len() {
        let data_end = copy_page_data(source, writer, &mut pages[index], offset, software)?;
        offset = pages[index].write(writer, order, data_end)?;
        if index > 0 {
            let start = pages[index].start_offset().unwrap_or(0);
            pages[index - 1].set_next_ifd_offset(writer, order, start)?;
        }
        debug!("Page {} written, next free offset {}", index, offset);
    }
    Ok(offset)
}

/// Copy the strips or tiles of `page` (and of its SubIFDs) to `offset`
///
/// Offsets fields are rewritten as LONG. For uncompressed single-strip pages
/// the byte counts are recomputed from the image geometry. Legacy JPEG
/// interchange streams and tables are copied too; ones that run off the end
/// of the source are dropped with a warning. Returns the stream position
/// after the copied data.
pub fn copy_page_data<R: Read + Seek, W: Write + Seek>(
    source: &mut R,
    writer: &mut W,
    page: &mut Ifd,
    offset: u32,
    software: Option<&str>,
) -> Result<u32> {
    writer.seek(SeekFrom::Start(offset as u64))?;
    let mut position = offset;

    let (offsets_tag, counts_tag) = if page.has_field(TiffTag::StripOffsets.code()) {
        (TiffTag::StripOffsets, TiffTag::StripByteCounts)
    } else {
        (TiffTag::TileOffsets, TiffTag::TileByteCounts)
    };
    let offsets = page
        .value(offsets_tag.code())
        .and_then(FieldValue::as_u32s)
        .unwrap_or_default();
    let mut counts = page
        .value(counts_tag.code())
        .and_then(FieldValue::as_u32s)
        .unwrap_or_default();

    let first_u32 = |page: &Ifd, tag: TiffTag| page.value(tag.code()).and_then(FieldValue::first_u32);
    if first_u32(page, TiffTag::Compression).unwrap_or(1) == 1 {
        let planar = first_u32(page, TiffTag::PlanarConfiguration).unwrap_or(1);
        let samples = first_u32(page, TiffTag::SamplesPerPixel).unwrap_or(1) as usize;
        if (planar == 1 && offsets.len() == 1) || (planar == 2 && offsets.len() == samples) {
            if let Some(expected) = bytes_to_read(page) {
                if expected.len() == offsets.len() && expected != counts {
                    debug!("{} recomputed from geometry: {:?} -> {:?}", counts_tag.name(), counts, expected);
                    counts = expected;
                    page.add_tiff_field(counts_tag, FieldValue::Long(counts.clone()));
                }
            }
        }
    }

    let mut new_offsets = Vec::with_capacity(offsets.len());
    for (index, &start) in offsets.iter().enumerate() {
        let length = counts.get(index).copied().ok_or_else(|| {
            Error::InvalidFormat(format!("{} entry {} has no byte count", offsets_tag.name(), index))
        })?;
        new_offsets.push(position);
        copy_range(source, writer, start, length)?;
        position = advance(position, length)?;
    }
    if !offsets.is_empty() {
        debug!("Copied {} {} entries to {}", offsets.len(), offsets_tag.name(), offset);
        page.add_tiff_field(offsets_tag, FieldValue::Long(new_offsets.clone()));
    }

    if let Some(software) = software {
        page.add_tiff_field(TiffTag::Software, FieldValue::ascii(software));
    }

    if let Some(interchange) = first_u32(page, TiffTag::JpegInterchangeFormat) {
        if offsets.first() == Some(&interchange) {
            // Interchange stream is the strip itself; point at its new copy
            let length = counts.first().copied().unwrap_or(0);
            page.add_tiff_field(TiffTag::JpegInterchangeFormat, FieldValue::long(new_offsets[0]));
            page.add_tiff_field(TiffTag::JpegInterchangeFormatLength, FieldValue::long(length));
        } else {
            let declared = first_u32(page, TiffTag::JpegInterchangeFormatLength);
            let copied = match declared {
                Some(length) => copy_range(source, writer, interchange, length).map(|_| length),
                None => {
                    source.seek(SeekFrom::Start(interchange as u64))?;
                    jpeg_io::copy_jpeg(source, writer).and_then(|n| {
                        u32::try_from(n).map_err(|_| Error::DataTooLarge {
                            size: n as usize,
                            max: u32::MAX as usize,
                        })
                    })
                }
            };
            match copied {
                Ok(length) => {
                    page.add_tiff_field(TiffTag::JpegInterchangeFormat, FieldValue::long(position));
                    page.add_tiff_field(TiffTag::JpegInterchangeFormatLength, FieldValue::long(length));
                    position = advance(position, length)?;
                }
                Err(Error::Truncated(reason)) => {
                    warn!("Dropping JPEG interchange stream at {}: {}", interchange, reason);
                    page.remove_field(TiffTag::JpegInterchangeFormat.code());
                    page.remove_field(TiffTag::JpegInterchangeFormatLength.code());
                    writer.seek(SeekFrom::Start(position as u64))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    for tag in [TiffTag::JpegQTables, TiffTag::JpegDcTables, TiffTag::JpegAcTables] {
        let Some(tables) = page.value(tag.code()).and_then(FieldValue::as_u32s) else {
            continue;
        };
        match copy_tables(source, writer, tag, &tables, &mut position) {
            Ok(moved) => {
                page.add_tiff_field(tag, FieldValue::Long(moved));
            }
            Err(Error::Truncated(reason)) => {
                warn!("Dropping {}: {}", tag.name(), reason);
                page.remove_field(tag.code());
                writer.seek(SeekFrom::Start(position as u64))?;
            }
            Err(e) => return Err(e),
        }
    }

    let sub_ifds = page.children_mut(TiffTag::SubIfds.code());
    for child in sub_ifds.iter_mut() {
        position = copy_page_data(source, writer, child, position, None)?;
    }

    Ok(position)
}

/// Copy legacy JPEG tables, returning their new offsets
///
/// Quantization tables are 64 bytes; Huffman tables are 16 code-length bytes
/// followed by as many symbols as those lengths add up to.
fn copy_tables<R: Read + Seek, W: Write + Seek>(
    source: &mut R,
    writer: &mut W,
    tag: TiffTag,
    tables: &[u32],
    position: &mut u32,
) -> Result<Vec<u32>> {
    let mut moved = Vec::with_capacity(tables.len());
    let mut cursor = *position;
    for &table in tables {
        let length = if tag == TiffTag::JpegQTables {
            QUANTIZATION_TABLE_LEN
        } else {
            source.seek(SeekFrom::Start(table as u64))?;
            let mut lengths = [0u8; 16];
            source.read_exact(&mut lengths)?;
            16 + lengths.iter().map(|&n| n as u32).sum::<u32>()
        };
        copy_range(source, writer, table, length)?;
        moved.push(cursor);
        cursor = advance(cursor, length)?;
    }
    *position = cursor;
    Ok(moved)
}

fn copy_range<R: Read + Seek, W: Write>(source: &mut R, writer: &mut W, offset: u32, length: u32) -> Result<()> {
    source.seek(SeekFrom::Start(offset as u64))?;
    let copied = io::copy(&mut source.by_ref().take(length as u64), writer)?;
    if copied < length as u64 {
        return Err(Error::Truncated(format!(
            "image data at {}: {} of {} bytes",
            offset, copied, length
        )));
    }
    Ok(())
}

fn advance(position: u32, length: u32) -> Result<u32> {
    position.checked_add(length).ok_or(Error::DataTooLarge {
        size: position as usize + length as usize,
        max: u32::MAX as usize,
    })
}

/// Expected strip byte counts of an uncompressed page, from its geometry
///
/// One entry for chunky (planar 1) data, one per plane otherwise. YCbCr data
/// is sized as one luma plane plus two subsampled chroma planes.
pub fn bytes_to_read(page: &Ifd) -> Option<Vec<u32>> {
    let get = |tag: TiffTag| page.value(tag.code()).and_then(FieldValue::first_u32).map(u64::from);

    let mut width = get(TiffTag::ImageWidth)?;
    let mut height = get(TiffTag::ImageLength)?;
    let samples = get(TiffTag::SamplesPerPixel).unwrap_or(1);
    let bits = get(TiffTag::BitsPerSample).unwrap_or(1);
    let planar = get(TiffTag::PlanarConfiguration).unwrap_or(1);
    let ycbcr = get(TiffTag::PhotometricInterpretation) == Some(6);

    let (h_sub, v_sub) = match page.value(TiffTag::YCbCrSubSampling.code()).and_then(FieldValue::as_u32s) {
        Some(factors) if factors.len() >= 2 => (u64::from(factors[0].max(1)), u64::from(factors[1].max(1))),
        _ => (2, 2),
    };
    if ycbcr {
        width = width.div_ceil(h_sub) * h_sub;
        height = height.div_ceil(v_sub) * v_sub;
    }

    let (rows, row_width) = match (get(TiffTag::TileWidth), get(TiffTag::TileLength)) {
        (Some(tile_width), Some(tile_length)) => (tile_length, tile_width),
        _ => (get(TiffTag::RowsPerStrip).unwrap_or(height).min(height), width),
    };

    let counts = if ycbcr {
        let luma = (bits * row_width).div_ceil(8) * rows;
        let chroma = (bits * row_width / h_sub).div_ceil(8) * (rows / v_sub);
        if planar == 1 {
            vec![luma + 2 * chroma]
        } else {
            vec![luma, chroma, chroma]
        }
    } else if planar == 1 {
        vec![(row_width * bits * samples).div_ceil(8) * rows]
    } else {
        vec![(row_width * bits).div_ceil(8) * rows; samples as usize]
    };

    counts.into_iter().map(|c| u32::try_from(c).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_tiff, TiffPage};
    use std::io::Cursor;

    fn page(fields: &[(TiffTag, FieldValue)]) -> Ifd {
        let mut ifd = Ifd::new();
        for (tag, value) in fields {
            ifd.add_tiff_field(*tag, value.clone());
        }
        ifd
    }

    #[test]
    fn test_bytes_to_read_chunky() {
        let ifd = page(&[
            (TiffTag::ImageWidth, FieldValue::long(5)),
            (TiffTag::ImageLength, FieldValue::long(3)),
            (TiffTag::BitsPerSample, FieldValue::Short(vec![8, 8, 8])),
            (TiffTag::SamplesPerPixel, FieldValue::short(3)),
        ]);
        assert_eq!(bytes_to_read(&ifd), Some(vec![45]));
    }

    #[test]
    fn test_bytes_to_read_bilevel_rounds_rows() {
        let ifd = page(&[
            (TiffTag::ImageWidth, FieldValue::long(10)),
            (TiffTag::ImageLength, FieldValue::long(4)),
        ]);
        assert_eq!(bytes_to_read(&ifd), Some(vec![8]));
    }

    #[test]
    fn test_bytes_to_read_planar() {
        let ifd = page(&[
            (TiffTag::ImageWidth, FieldValue::long(4)),
            (TiffTag::ImageLength, FieldValue::long(2)),
            (TiffTag::BitsPerSample, FieldValue::short(8)),
            (TiffTag::SamplesPerPixel, FieldValue::short(3)),
            (TiffTag::PlanarConfiguration, FieldValue::short(2)),
        ]);
        assert_eq!(bytes_to_read(&ifd), Some(vec![8, 8, 8]));
    }

    #[test]
    fn test_bytes_to_read_ycbcr() {
        // 3x3 rounds up to 4x4; luma 16 bytes, each chroma plane 2x2 = 4 bytes
        let ifd = page(&[
            (TiffTag::ImageWidth, FieldValue::long(3)),
            (TiffTag::ImageLength, FieldValue::long(3)),
            (TiffTag::BitsPerSample, FieldValue::short(8)),
            (TiffTag::SamplesPerPixel, FieldValue::short(3)),
            (TiffTag::PhotometricInterpretation, FieldValue::short(6)),
        ]);
        assert_eq!(bytes_to_read(&ifd), Some(vec![24]));
    }

    #[test]
    fn test_copy_pages_relocates_strips() {
        let data = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(4, 2), TiffPage::gray(2, 2)]);
        let io = TiffIO::new();
        let (order, mut pages) = io.read_pages(&mut Cursor::new(&data)).unwrap();
        assert_eq!(pages.len(), 2);

        let mut out = Cursor::new(Vec::new());
        io.copy_pages(&mut Cursor::new(&data), &mut out, order, &mut pages).unwrap();
        let out = out.into_inner();

        let (_, reread) = io.read_pages(&mut Cursor::new(&out)).unwrap();
        assert_eq!(reread.len(), 2);
        for (index, page) in reread.iter().enumerate() {
            let strip = page.value(TiffTag::StripOffsets.code()).and_then(FieldValue::first_u32).unwrap() as usize;
            let count = page.value(TiffTag::StripByteCounts.code()).and_then(FieldValue::first_u32).unwrap() as usize;
            assert!(out[strip..strip + count].iter().all(|&b| b == TiffPage::fill_byte(index)));
            assert_eq!(
                page.value(TiffTag::Software.code()).and_then(FieldValue::as_string).as_deref(),
                Some(DEFAULT_SOFTWARE)
            );
        }
    }

    #[test]
    fn test_page_out_of_range() {
        let data = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(2, 2)]);
        let result = TiffIO::new().insert_icc_profile(&mut Cursor::new(&data), &mut Cursor::new(Vec::new()), 3, b"icc");
        assert!(matches!(result, Err(Error::PageOutOfRange { page: 3, pages: 1 })));
    }

    #[test]
    fn test_critical_tag_conflict() {
        let data = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(4, 2)]);
        let mut exif = Exif::new();
        exif.set_image_field(TiffTag::ImageWidth, FieldValue::long(99));
        let result = TiffIO::new().insert_exif(&mut Cursor::new(&data), &mut Cursor::new(Vec::new()), 0, &exif, true);
        assert!(matches!(result, Err(Error::CriticalTagConflict { code: 0x0100, .. })));

        // Same value is accepted
        let mut exif = Exif::new();
        exif.set_image_field(TiffTag::ImageWidth, FieldValue::long(4));
        TiffIO::new()
            .insert_exif(&mut Cursor::new(&data), &mut Cursor::new(Vec::new()), 0, &exif, true)
            .unwrap();
    }

    #[test]
    fn test_detect() {
        assert_eq!(TiffIO::detect(b"II*\0\x08\0\0\0"), Some(Container::Tiff));
        assert_eq!(TiffIO::detect(b"MM\0*\0\0\0\x08"), Some(Container::Tiff));
        assert_eq!(TiffIO::detect(b"\xFF\xD8\xFF\xE0"), None);
    }
}
