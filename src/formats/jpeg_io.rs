//! JPEG container I/O implementation
//!
//! Edits read the marker segments up to and including the first SOS header,
//! change that list in memory, write it back with recomputed lengths and then
//! copy the rest of the stream (entropy-coded data onwards) verbatim.
//!
//! Fill bytes (extra 0xFF before a marker) carry no data. They are dropped
//! between header segments, so an edited file is byte-identical to its source
//! only from the first scan on.

use crate::{
    error::{Error, Result},
    exif::Exif,
    formats::{Container, ContainerIO},
    icc::{self, IccAssembler},
    iptc::{self, IptcDataSet},
    irb::{resource_id, ImageResource, Irb, ThumbnailResource},
    metadata::{join_comments, Metadata, MetadataKind, MetadataRegistry, StructuredValue},
    segment::{id, is_sof, is_standalone, marker, marker_label, Segment, MAX_SEGMENT_PAYLOAD},
    stream::{PositionReader, ProcessingWriter},
    thumbnail::{generate_thumbnail, BitmapCodec, Thumbnail, ThumbnailOptions},
    xmp::{self, ExtendedXmpAssembler, Xmp},
};
use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, log_enabled, warn, Level};
use std::io::{self, Cursor, Read, Seek, Write};

/// Size of the buffer used while copying entropy-coded data
const SCAN_BUFFER_SIZE: usize = 8192;

/// How far `read_segments` goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Stop after the first SOS header
    Header,
    /// Read every segment up to EOI, skipping entropy-coded data
    Metadata,
    /// Read every segment up to EOI, keeping entropy-coded data
    Full,
}

fn premature_end(code: u16, offset: u64) -> impl FnOnce(io::Error) -> Error {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Truncated(format!(
            "Premature end of {} segment at offset {}",
            marker_label(code),
            offset
        )),
        _ => Error::Io(e),
    }
}

fn expect_soi<R: Read>(source: &mut R) -> Result<()> {
    let mut soi = [0u8; 2];
    if source.read_exact(&mut soi).is_err() || u16::from_be_bytes(soi) != marker::SOI {
        return Err(Error::InvalidFormat("Not a JPEG file".into()));
    }
    Ok(())
}

/// Read the next marker code, skipping 0xFF fill bytes
///
/// Fill bytes are not kept; `write_segments` emits each marker unpadded.
fn read_marker<R: Read>(source: &mut PositionReader<R>) -> Result<u16> {
    let offset = source.position();
    let prefix = source.read_u8()?;
    if prefix != 0xFF {
        return Err(Error::InvalidSegment {
            offset,
            reason: format!("Expected 0xFF, got 0x{:02X}", prefix),
        });
    }
    let mut code = source.read_u8()?;
    while code == 0xFF {
        code = source.read_u8()?;
    }
    Ok(0xFF00 | code as u16)
}

/// Read the length and payload following `code`
fn read_segment<R: Read>(source: &mut PositionReader<R>, code: u16) -> Result<Segment> {
    if is_standalone(code) {
        return Ok(Segment::standalone(code));
    }
    let offset = source.position().saturating_sub(2);
    let length = source
        .read_u16::<BigEndian>()
        .map_err(premature_end(code, offset))?;
    if length < 2 {
        return Err(Error::InvalidSegment {
            offset,
            reason: format!("{} declares length {}", marker_label(code), length),
        });
    }
    let mut payload = vec![0u8; length as usize - 2];
    source
        .read_exact(&mut payload)
        .map_err(premature_end(code, offset))?;
    debug!("{} at {} ({} bytes)", marker_label(code), offset, length);
    Ok(Segment::new(code, payload))
}

/// Summaries of the quantization, Huffman and frame segments
fn log_tables(segment: &Segment) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    let payload = segment.payload.as_slice();
    match segment.marker {
        marker::DQT => {
            let mut rest = payload;
            while let Some((&pq_tq, tail)) = rest.split_first() {
                let precision = if pq_tq >> 4 == 0 { 8 } else { 16 };
                debug!("  DQT table {} ({}-bit)", pq_tq & 0x0F, precision);
                rest = tail.get(64 * precision / 8..).unwrap_or(&[]);
            }
        }
        marker::DHT => {
            let mut rest = payload;
            while rest.len() >= 17 {
                let class = if rest[0] >> 4 == 0 { "DC" } else { "AC" };
                let symbols: usize = rest[1..17].iter().map(|&n| n as usize).sum();
                debug!("  DHT {} table {} ({} codes)", class, rest[0] & 0x0F, symbols);
                rest = rest.get(17 + symbols..).unwrap_or(&[]);
            }
        }
        code if is_sof(code) && payload.len() >= 6 => {
            debug!(
                "  {} {}x{}, {}-bit, {} components",
                marker_label(code),
                u16::from_be_bytes([payload[3], payload[4]]),
                u16::from_be_bytes([payload[1], payload[2]]),
                payload[0],
                payload[5]
            );
        }
        _ => {}
    }
}

fn read_segments<R: Read>(source: &mut R, mode: ScanMode) -> Result<Vec<Segment>> {
    let mut source = PositionReader::new(source);
    expect_soi(&mut source)?;

    let mut segments = vec![Segment::standalone(marker::SOI)];
    let mut code = read_marker(&mut source)?;
    loop {
        let mut segment = read_segment(&mut source, code)?;
        log_tables(&segment);
        match code {
            marker::EOI => {
                segments.push(segment);
                break;
            }
            marker::SOS if mode == ScanMode::Header => {
                segments.push(segment);
                break;
            }
            marker::SOS => {
                let next = if mode == ScanMode::Full {
                    copy_scan_data(&mut source, &mut segment.scan_data)?
                } else {
                    skip_scan_data(&mut source)?
                };
                segments.push(segment);
                code = next;
            }
            _ => {
                segments.push(segment);
                code = read_marker(&mut source)?;
            }
        }
    }
    Ok(segments)
}

/// Every segment from SOI to EOI, SOS segments carrying their scan data
///
/// Writing the result back with [`write_segments`] reproduces the input.
pub fn scan<R: Read>(source: &mut R) -> Result<Vec<Segment>> {
    read_segments(source, ScanMode::Full)
}

/// Segments from SOI up to and including the first SOS header
///
/// The source is left positioned at the first byte of entropy-coded data.
pub fn read_header<R: Read>(source: &mut R) -> Result<Vec<Segment>> {
    read_segments(source, ScanMode::Header)
}

pub fn write_segments<W: Write>(writer: &mut W, segments: &[Segment]) -> Result<()> {
    for segment in segments {
        segment.write(writer)?;
    }
    Ok(())
}

fn read_scan_byte<R: Read>(source: &mut R) -> Result<u8> {
    source.read_u8().map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Truncated("Premature end of SOS segment".into()),
        _ => Error::Io(e),
    })
}

/// Copy entropy-coded data until the next marker other than RSTn
///
/// Stuffed `FF 00` pairs and restart markers are copied as data. Returns the
/// terminating marker, which is consumed but not written; fill bytes in
/// front of it are dropped.
pub fn copy_scan_data<R: Read, W: Write>(source: &mut R, writer: &mut W) -> Result<u16> {
    let mut buffer = Vec::with_capacity(SCAN_BUFFER_SIZE);
    let code = loop {
        let byte = read_scan_byte(source)?;
        if byte != 0xFF {
            buffer.push(byte);
        } else {
            let mut next = read_scan_byte(source)?;
            while next == 0xFF {
                next = read_scan_byte(source)?;
            }
            match next {
                0x00 | 0xD0..=0xD7 => buffer.extend_from_slice(&[0xFF, next]),
                _ => break 0xFF00 | next as u16,
            }
        }
        if buffer.len() >= SCAN_BUFFER_SIZE {
            writer.write_all(&buffer)?;
            buffer.clear();
        }
    };
    writer.write_all(&buffer)?;
    Ok(code)
}

/// Skip entropy-coded data, returning the terminating marker
pub fn skip_scan_data<R: Read>(source: &mut R) -> Result<u16> {
    copy_scan_data(source, &mut io::sink())
}

/// Copy one complete JPEG stream (SOI through EOI), returning its length
///
/// Used for embedded streams whose length is not recorded anywhere.
pub fn copy_jpeg<R: Read, W: Write>(source: &mut R, writer: &mut W) -> Result<u64> {
    let mut written = 0u64;
    let mut out = ProcessingWriter::new(writer, |chunk| written += chunk.len() as u64);
    let mut source = PositionReader::new(source);

    expect_soi(&mut source)?;
    Segment::standalone(marker::SOI).write(&mut out)?;
    let mut code = read_marker(&mut source)?;
    loop {
        read_segment(&mut source, code)?.write(&mut out)?;
        code = match code {
            marker::EOI => break,
            marker::SOS => copy_scan_data(&mut source, &mut out)?,
            _ => read_marker(&mut source)?,
        };
    }
    drop(out);
    Ok(written)
}

/// Width and height from the first SOFn segment
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let segments = read_header(&mut Cursor::new(data)).ok()?;
    let frame = segments.iter().find(|s| is_sof(s.marker))?;
    let p = &frame.payload;
    if p.len() < 5 {
        return None;
    }
    Some((
        u16::from_be_bytes([p[3], p[4]]) as u32,
        u16::from_be_bytes([p[1], p[2]]) as u32,
    ))
}

fn is_jfif(s: &Segment) -> bool {
    s.marker == marker::APP0 && (s.has_identifier(id::JFIF) || s.has_identifier(id::JFXX))
}

fn is_exif(s: &Segment) -> bool {
    s.marker == marker::APP1 && s.has_identifier(id::EXIF)
}

fn is_xmp(s: &Segment) -> bool {
    s.marker == marker::APP1
        && (s.has_identifier(id::XMP) || s.has_identifier(id::NON_STANDARD_XMP) || s.has_identifier(id::XMP_EXTENSION))
}

fn is_icc(s: &Segment) -> bool {
    s.marker == marker::APP2 && s.has_identifier(id::ICC_PROFILE)
}

fn is_ducky(s: &Segment) -> bool {
    s.marker == marker::APP12 && s.has_identifier(id::DUCKY)
}

fn is_irb(s: &Segment) -> bool {
    s.marker == marker::APP13 && s.has_identifier(id::PHOTOSHOP)
}

fn is_adobe(s: &Segment) -> bool {
    s.marker == marker::APP14 && s.has_identifier(id::ADOBE)
}

/// Whether `segment` carries (part of) metadata `kind`
fn holds(segment: &Segment, kind: MetadataKind) -> bool {
    match kind {
        MetadataKind::Exif => is_exif(segment),
        MetadataKind::Xmp => is_xmp(segment),
        MetadataKind::IccProfile => is_icc(segment),
        MetadataKind::PhotoshopIrb => is_irb(segment),
        MetadataKind::Comment => segment.marker == marker::COM,
        MetadataKind::Jfif => is_jfif(segment),
        MetadataKind::Ducky => is_ducky(segment),
        MetadataKind::Adobe => is_adobe(segment),
        MetadataKind::Iptc => false,
    }
}

/// IRB resources that duplicate another metadata kind
fn mirrored_resources(kind: MetadataKind) -> &'static [u16] {
    match kind {
        MetadataKind::Iptc => &[resource_id::IPTC_NAA],
        MetadataKind::Xmp => &[resource_id::XMP_METADATA],
        MetadataKind::Exif => &[resource_id::EXIF_DATA1, resource_id::EXIF_DATA3],
        MetadataKind::IccProfile => &[resource_id::ICC_PROFILE],
        _ => &[],
    }
}

/// Index just after the last segment matching `anchor`, or just after SOI
fn insertion_point(segments: &[Segment], anchor: impl Fn(&Segment) -> bool) -> usize {
    segments.iter().rposition(anchor).map_or(1, |i| i + 1)
}

fn app_anchor(s: &Segment) -> bool {
    s.marker == marker::APP0 || s.marker == marker::APP1
}

/// Index of the first SOS (or EOI), where frame-level segments end
fn scan_start(segments: &[Segment]) -> usize {
    segments
        .iter()
        .position(|s| s.marker == marker::SOS || s.marker == marker::EOI)
        .unwrap_or(segments.len())
}

/// Photoshop IRB joined from every APP13 segment
fn collect_irb(segments: &[Segment]) -> Option<Vec<u8>> {
    let mut data: Option<Vec<u8>> = None;
    for body in segments.iter().filter_map(|s| if is_irb(s) { s.body_after(id::PHOTOSHOP) } else { None }) {
        data.get_or_insert_with(Vec::new).extend_from_slice(body);
    }
    data
}

/// Replace every APP13 Photoshop segment with `irb`, split over as many
/// segments as its size needs; an empty IRB just removes them
fn replace_irb(segments: &mut Vec<Segment>, irb: &Irb) -> Result<()> {
    let first = segments.iter().position(is_irb);
    segments.retain(|s| !is_irb(s));
    if irb.is_empty() {
        return Ok(());
    }

    let data = irb.to_bytes()?;
    let at = first.unwrap_or_else(|| insertion_point(segments, app_anchor));
    let capacity = MAX_SEGMENT_PAYLOAD - id::PHOTOSHOP.len();
    let replacement: Vec<Segment> = data
        .chunks(capacity)
        .map(|chunk| Segment::with_identifier(marker::APP13, id::PHOTOSHOP, chunk))
        .collect();
    debug!("Writing {} byte IRB in {} APP13 segments", data.len(), replacement.len());
    segments.splice(at..at, replacement);
    Ok(())
}

fn parse_irb(segments: &[Segment]) -> Result<Option<Irb>> {
    collect_irb(segments).map(|data| Irb::parse(&data)).transpose()
}

/// Build the registry for the metadata carried by `segments`
///
/// Blocks that cannot be interpreted are logged and skipped.
fn collect_metadata(segments: &[Segment]) -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    let mut icc = IccAssembler::new();
    let mut standard_xmp: Option<&[u8]> = None;
    let mut extensions: Vec<&[u8]> = Vec::new();
    let mut comments = Vec::new();

    for segment in segments {
        match segment.marker {
            marker::APP0 => {
                if let Some(body) = segment.body_after(id::JFIF) {
                    registry.insert(Metadata::new(MetadataKind::Jfif, body.to_vec()));
                }
            }
            marker::APP1 => {
                if let Some(body) = segment.body_after(id::EXIF) {
                    registry.insert(Metadata::new(MetadataKind::Exif, body.to_vec()));
                } else if let Some(body) = segment
                    .body_after(id::XMP)
                    .or_else(|| segment.body_after(id::NON_STANDARD_XMP))
                {
                    if standard_xmp.is_some() {
                        warn!("Ignoring additional standard XMP packet");
                    } else {
                        standard_xmp = Some(body);
                    }
                } else if segment.has_identifier(id::XMP_EXTENSION) {
                    extensions.push(&segment.payload);
                }
            }
            marker::APP2 => {
                icc.push(&segment.payload);
            }
            marker::APP12 => {
                if let Some(body) = segment.body_after(id::DUCKY) {
                    registry.insert(Metadata::new(MetadataKind::Ducky, body.to_vec()));
                }
            }
            marker::APP14 => {
                if let Some(body) = segment.body_after(id::ADOBE) {
                    registry.insert(Metadata::new(MetadataKind::Adobe, body.to_vec()));
                }
            }
            marker::COM => comments.push(String::from_utf8_lossy(&segment.payload).into_owned()),
            _ => {}
        }
    }

    if let Some(standard) = standard_xmp {
        let extended = xmp::extended_guid(standard).and_then(|guid| {
            let mut assembler = ExtendedXmpAssembler::new(guid);
            for payload in &extensions {
                if let Err(e) = assembler.push(payload) {
                    warn!("Dropping ExtendedXMP: {}", e);
                    return None;
                }
            }
            assembler.finish()
        });
        let value = match extended {
            Some(extended) => Xmp::with_extended(standard, extended),
            None => Xmp::new(standard),
        };
        registry.insert(Metadata::with_value(
            MetadataKind::Xmp,
            standard.to_vec(),
            StructuredValue::Xmp(value),
        ));
    } else if !extensions.is_empty() {
        warn!("Found {} ExtendedXMP chunks without a standard packet", extensions.len());
    }

    if let Some(profile) = icc.finish() {
        registry.insert(Metadata::new(MetadataKind::IccProfile, profile));
    }

    if let Some(data) = collect_irb(segments) {
        match Irb::parse(&data) {
            Ok(irb) => {
                if let Some(resource) = irb.get(resource_id::IPTC_NAA) {
                    registry.insert(Metadata::new(MetadataKind::Iptc, resource.data().to_vec()));
                }
                registry.insert(Metadata::with_value(
                    MetadataKind::PhotoshopIrb,
                    data,
                    StructuredValue::PhotoshopIrb(irb),
                ));
            }
            Err(e) => {
                warn!("Unreadable Photoshop IRB: {}", e);
                registry.insert(Metadata::new(MetadataKind::PhotoshopIrb, data));
            }
        }
    }

    if !comments.is_empty() {
        registry.insert(Metadata::with_value(
            MetadataKind::Comment,
            join_comments(&comments),
            StructuredValue::Comments(comments),
        ));
    }

    registry
}

/// JPEG container I/O implementation
pub struct JpegIO<'c> {
    codec: Option<&'c dyn BitmapCodec>,
    thumbnail_options: ThumbnailOptions,
}

impl<'c> JpegIO<'c> {
    /// Create a new JPEG I/O implementation
    pub fn new() -> Self {
        Self {
            codec: None,
            thumbnail_options: ThumbnailOptions::default(),
        }
    }

    /// Use `codec` to encode raw thumbnails and generate missing ones
    pub fn with_codec(mut self, codec: &'c dyn BitmapCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_thumbnail_options(mut self, options: ThumbnailOptions) -> Self {
        self.thumbnail_options = options;
        self
    }

    /// Read the header, let `edit` change it, then write it followed by the
    /// untouched remainder of the stream
    ///
    /// Nothing is written if `edit` fails or a segment is too large.
    fn rewrite<R, W, F>(&self, source: &mut R, writer: &mut W, edit: F) -> Result<()>
    where
        R: Read,
        W: Write,
        F: FnOnce(&mut Vec<Segment>) -> Result<()>,
    {
        let mut segments = read_header(source)?;
        edit(&mut segments)?;
        if let Some(segment) = segments.iter().find(|s| s.payload.len() > MAX_SEGMENT_PAYLOAD) {
            return Err(Error::DataTooLarge {
                size: segment.payload.len(),
                max: MAX_SEGMENT_PAYLOAD,
            });
        }
        write_segments(writer, &segments)?;
        let copied = io::copy(source, writer)?;
        debug!("Wrote {} segments and {} bytes of image data", segments.len(), copied);
        Ok(())
    }

    /// Add COM segments just before the first scan
    pub fn insert_comments<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, comments: &[String]) -> Result<()> {
        self.rewrite(source, writer, |segments| {
            let at = scan_start(segments);
            let new = comments
                .iter()
                .map(|comment| Segment::new(marker::COM, comment.as_bytes().to_vec()));
            segments.splice(at..at, new);
            Ok(())
        })
    }

    /// Write EXIF into APP1
    ///
    /// An existing EXIF segment is replaced in place; with `update` its fields
    /// and thumbnail are kept unless `exif` overrides them. Without one, the
    /// new segment goes right after SOI. When `exif` asks for a thumbnail and
    /// has none, one is generated from the image through the codec.
    pub fn insert_exif<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, exif: &Exif, update: bool) -> Result<()> {
        let mut exif = exif.clone();
        if exif.thumbnail_required() && exif.thumbnail().is_none() {
            match self.codec {
                Some(codec) => {
                    let mut image = Vec::new();
                    source.read_to_end(&mut image)?;
                    exif.set_thumbnail(generate_thumbnail(codec, &image, &self.thumbnail_options)?);
                    return self.write_exif(&mut Cursor::new(image), writer, exif, update);
                }
                None => warn!("EXIF thumbnail requested but no bitmap codec is set"),
            }
        }
        self.write_exif(source, writer, exif, update)
    }

    fn write_exif<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, exif: Exif, update: bool) -> Result<()> {
        self.rewrite(source, writer, |segments| {
            let existing = segments.iter().position(is_exif);
            let mut exif = exif;
            if let (true, Some(index)) = (update, existing) {
                let body = segments[index].body_after(id::EXIF).unwrap_or_default();
                match Exif::parse(body) {
                    Ok(mut previous) => {
                        previous.merge(&exif);
                        exif = previous;
                    }
                    Err(e) => warn!("Replacing unreadable EXIF: {}", e),
                }
            }

            let segment = Segment::with_identifier(marker::APP1, id::EXIF, &exif.to_bytes(self.codec)?);
            match existing {
                Some(index) => segments[index] = segment,
                None => segments.insert(1, segment),
            }
            Ok(())
        })
    }

    /// Replace any ICC profile with `profile`, chunked over APP2 segments
    pub fn insert_icc_profile<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, profile: &[u8]) -> Result<()> {
        let chunks = icc::chunk_profile(profile)?;
        self.rewrite(source, writer, |segments| {
            segments.retain(|s| !is_icc(s));
            let at = insertion_point(segments, app_anchor);
            debug!("Inserting ICC profile ({} bytes, {} chunks) at {}", profile.len(), chunks.len(), at);
            segments.splice(at..at, chunks.into_iter().map(|chunk| Segment::new(marker::APP2, chunk)));
            Ok(())
        })
    }

    /// Write IPTC into the IPTC-NAA resource of the Photoshop IRB
    ///
    /// With `update` existing data sets are merged with `sets`; other IRB
    /// resources are kept either way.
    pub fn insert_iptc<R: Read, W: Write>(
        &self,
        source: &mut R,
        writer: &mut W,
        sets: &[IptcDataSet],
        update: bool,
    ) -> Result<()> {
        self.rewrite(source, writer, |segments| {
            let mut irb = parse_irb(segments)?.unwrap_or_default();
            let merged = if update {
                iptc::merge(&irb.iptc()?, sets)
            } else {
                iptc::merge(&[], sets)
            };
            irb.insert(ImageResource::new(resource_id::IPTC_NAA, "", iptc::to_bytes(&merged)?));
            replace_irb(segments, &irb)
        })
    }

    /// Write resources into APP13, upserting into the existing IRB when
    /// `update` is set
    pub fn insert_irb<R: Read, W: Write>(
        &self,
        source: &mut R,
        writer: &mut W,
        resources: &[ImageResource],
        update: bool,
    ) -> Result<()> {
        self.rewrite(source, writer, |segments| {
            let mut irb = if update {
                parse_irb(segments)?.unwrap_or_default()
            } else {
                Irb::new()
            };
            irb.merge(resources, update);
            replace_irb(segments, &irb)
        })
    }

    /// Store `thumbnail` as the IRB thumbnail resource
    pub fn insert_irb_thumbnail<R: Read, W: Write>(
        &self,
        source: &mut R,
        writer: &mut W,
        thumbnail: &Thumbnail,
        update: bool,
    ) -> Result<()> {
        let resource = ThumbnailResource::from_thumbnail(
            resource_id::THUMBNAIL_RESOURCE_PS5,
            thumbnail,
            self.codec,
            self.thumbnail_options.quality,
        )?
        .to_resource()?;
        self.insert_irb(source, writer, &[resource], update)
    }

    /// Replace any XMP with `xmp`, adding ExtendedXMP chunks when it has an
    /// extended part
    pub fn insert_xmp<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, xmp: &Xmp) -> Result<()> {
        let payloads = xmp.app1_payloads()?;
        self.rewrite(source, writer, |segments| {
            segments.retain(|s| !is_xmp(s));
            let at = insertion_point(segments, |s| s.marker == marker::APP0 || is_exif(s));
            segments.splice(at..at, payloads.into_iter().map(|p| Segment::new(marker::APP1, p)));
            Ok(())
        })
    }

    /// Read every metadata block up to EOI
    pub fn read_metadata<R: Read>(&self, source: &mut R) -> Result<MetadataRegistry> {
        let segments = read_segments(source, ScanMode::Metadata)?;
        let registry = collect_metadata(&segments);
        debug!("JPEG metadata: {:?}", registry.kinds().collect::<Vec<_>>());
        Ok(registry)
    }

    /// Remove the given kinds, returning what was removed
    ///
    /// Removing PHOTOSHOP_IRB drops APP13 entirely. Otherwise only the IRB
    /// resources mirroring removed kinds are dropped from it.
    pub fn remove_metadata<R: Read, W: Write>(
        &self,
        source: &mut R,
        writer: &mut W,
        kinds: &[MetadataKind],
    ) -> Result<MetadataRegistry> {
        let mut removed = MetadataRegistry::new();
        self.rewrite(source, writer, |segments| {
            for metadata in collect_metadata(segments) {
                if kinds.contains(&metadata.kind()) {
                    removed.insert(metadata);
                }
            }
            segments.retain(|s| !kinds.iter().any(|&kind| holds(s, kind)));

            if !kinds.contains(&MetadataKind::PhotoshopIrb) {
                let mirrored: Vec<u16> = kinds.iter().flat_map(|&k| mirrored_resources(k)).copied().collect();
                match parse_irb(segments) {
                    Ok(Some(mut irb)) if !mirrored.is_empty() => {
                        let before = irb.len();
                        for &resource in &mirrored {
                            irb.remove(resource);
                        }
                        if irb.len() != before {
                            replace_irb(segments, &irb)?;
                        }
                    }
                    Err(e) => warn!("Leaving unreadable Photoshop IRB untouched: {}", e),
                    _ => {}
                }
            }
            Ok(())
        })?;
        Ok(removed)
    }

    /// Remove every segment with the given APPn marker, returning how many
    pub fn remove_appn<R: Read, W: Write>(&self, source: &mut R, writer: &mut W, app: u16) -> Result<usize> {
        if !(marker::APP0..=marker::APP15).contains(&app) {
            return Err(Error::InvalidFormat(format!("0x{:04X} is not an APPn marker", app)));
        }
        let mut count = 0;
        self.rewrite(source, writer, |segments| {
            let before = segments.len();
            segments.retain(|s| s.marker != app);
            count = before - segments.len();
            Ok(())
        })?;
        debug!("Removed {} {} segments", count, marker_label(app));
        Ok(count)
    }

    /// ICC profile reassembled from the APP2 chunks before the first scan
    pub fn extract_icc_profile<R: Read>(&self, source: &mut R) -> Result<Option<Vec<u8>>> {
        let mut assembler = IccAssembler::new();
        for segment in read_header(source)?.iter().filter(|s| is_icc(s)) {
            assembler.push(&segment.payload);
        }
        Ok(assembler.finish())
    }

    /// Thumbnails from EXIF IFD1, the Photoshop IRB and JFIF
    pub fn extract_thumbnails<R: Read>(&self, source: &mut R) -> Result<Vec<(MetadataKind, Thumbnail)>> {
        Ok(self.read_metadata(source)?.thumbnails())
    }
}

impl Default for JpegIO<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerIO for JpegIO<'_> {
    fn container_type() -> Container {
        Container::Jpeg
    }

    fn extensions() -> &'static [&'static str] {
        &["jpg", "jpeg", "jpe", "jfif"]
    }

    fn mime_types() -> &'static [&'static str] {
        &["image/jpeg", "image/jpg"]
    }

    fn detect(header: &[u8]) -> Option<Container> {
        // JPEG magic bytes: FF D8
        if header.len() >= 2 && header[0] == 0xFF && header[1] == 0xD8 {
            Some(Container::Jpeg)
        } else {
            None
        }
    }

    fn read_metadata<R: Read + Seek>(&self, source: &mut R) -> Result<MetadataRegistry> {
        JpegIO::read_metadata(self, source)
    }

    fn remove_metadata<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        kinds: &[MetadataKind],
    ) -> Result<MetadataRegistry> {
        JpegIO::remove_metadata(self, source, writer, kinds)
    }

    fn insert_comments<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        comments: &[String],
    ) -> Result<()> {
        JpegIO::insert_comments(self, source, writer, comments)
    }

    fn insert_exif<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        exif: &Exif,
        update: bool,
    ) -> Result<()> {
        JpegIO::insert_exif(self, source, writer, exif, update)
    }

    fn insert_icc_profile<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        profile: &[u8],
    ) -> Result<()> {
        JpegIO::insert_icc_profile(self, source, writer, profile)
    }

    fn insert_iptc<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        sets: &[IptcDataSet],
        update: bool,
    ) -> Result<()> {
        JpegIO::insert_iptc(self, source, writer, sets, update)
    }

    fn insert_irb<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        resources: &[ImageResource],
        update: bool,
    ) -> Result<()> {
        JpegIO::insert_irb(self, source, writer, resources, update)
    }

    fn insert_xmp<R: Read + Seek, W: Write + Seek>(&self, source: &mut R, writer: &mut W, xmp: &Xmp) -> Result<()> {
        JpegIO::insert_xmp(self, source, writer, xmp)
    }

    fn extract_icc_profile<R: Read + Seek>(&self, source: &mut R) -> Result<Option<Vec<u8>>> {
        JpegIO::extract_icc_profile(self, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_jpeg, jfif_segment, minimal_jpeg, SCAN_DATA, SOS_PAYLOAD};

    #[test]
    fn test_scan_round_trip() {
        let data = build_jpeg(&[jfif_segment(), Segment::new(marker::COM, b"hi".to_vec())]);
        let segments = scan(&mut Cursor::new(&data)).unwrap();
        assert_eq!(segments.first().map(|s| s.marker), Some(marker::SOI));
        assert_eq!(segments.last().map(|s| s.marker), Some(marker::EOI));

        let mut out = Vec::new();
        write_segments(&mut out, &segments).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_not_a_jpeg() {
        let err = scan(&mut Cursor::new(b"GIF89a")).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(ref msg) if msg.contains("Not a JPEG")));
        assert!(matches!(scan(&mut Cursor::new(b"")), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_segment() {
        // APP1 claims 100 bytes, only 3 follow
        let data = [0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x64, 1, 2, 3];
        let err = read_header(&mut Cursor::new(&data[..])).unwrap_err();
        assert!(matches!(err, Error::Truncated(ref msg) if msg.contains("APP1")));
    }

    #[test]
    fn test_padding_bytes_skipped() {
        let data = [0xFF, 0xD8, 0xFF, 0xFF, 0xFF, 0xFE, 0x00, 0x03, b'x', 0xFF, 0xD9];
        let segments = scan(&mut Cursor::new(&data[..])).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].marker, marker::COM);
        assert_eq!(segments[1].payload, b"x");
    }

    #[test]
    fn test_edit_drops_header_fill_bytes_only() {
        let clean = build_jpeg(&[Segment::new(marker::COM, b"x".to_vec())]);
        let sos = clean.len() - SCAN_DATA.len() - 2 - (SOS_PAYLOAD.len() + 4);
        let mut padded = clean.clone();
        padded.insert(2, 0xFF);
        // Fill before EOI lies in the verbatim tail
        let eoi = padded.len() - 2;
        padded.insert(eoi, 0xFF);

        let mut out = Vec::new();
        JpegIO::new()
            .insert_comments(&mut Cursor::new(&padded), &mut out, &[])
            .unwrap();
        assert_eq!(&out[..sos], &clean[..sos]);
        assert_eq!(&out[sos..], &padded[sos + 1..]);
    }

    #[test]
    fn test_scan_data_stuffing_and_restart() {
        let scan_bytes = [0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56];
        let mut data = scan_bytes.to_vec();
        data.extend_from_slice(&[0xFF, 0xD9]);

        let mut out = Vec::new();
        let next = copy_scan_data(&mut Cursor::new(&data), &mut out).unwrap();
        assert_eq!(next, marker::EOI);
        assert_eq!(out, scan_bytes);

        let err = skip_scan_data(&mut Cursor::new(&scan_bytes[..])).unwrap_err();
        assert!(matches!(err, Error::Truncated(ref msg) if msg.contains("SOS")));
    }

    #[test]
    fn test_copy_jpeg_stops_at_eoi() {
        let jpeg = minimal_jpeg();
        let mut data = jpeg.clone();
        data.extend_from_slice(b"trailing");

        let mut out = Vec::new();
        let copied = copy_jpeg(&mut Cursor::new(&data), &mut out).unwrap();
        assert_eq!(copied as usize, jpeg.len());
        assert_eq!(out, jpeg);
    }

    #[test]
    fn test_insertion_point() {
        let soi = Segment::standalone(marker::SOI);
        let dqt = Segment::new(marker::DQT, vec![0; 65]);
        assert_eq!(insertion_point(&[soi.clone(), dqt.clone()], app_anchor), 1);
        assert_eq!(insertion_point(&[soi, jfif_segment(), dqt], app_anchor), 2);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(jpeg_dimensions(&minimal_jpeg()), Some((8, 8)));
        assert_eq!(jpeg_dimensions(b"nope"), None);
    }
}
