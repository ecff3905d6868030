//! Synthetic fixtures for tests and fuzzers.
//!
//! Everything here is built in memory, byte by byte, without going through the
//! crate's own writers, so tests compare the engines against an independent
//! encoding.
//!
//! # Usage
//!
//! ```
//! use meta_io::test_utils::*;
//! use meta_io::ByteOrder;
//!
//! let jpeg = minimal_jpeg();
//! assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
//!
//! let tiff = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(4, 2).with_exif()]);
//! assert_eq!(&tiff[..4], b"MM\0*");
//! ```

use crate::{
    io::ByteOrder,
    segment::{id, marker, Segment},
    thumbnail::{BitmapCodec, PixelBuffer},
    Result,
};

/// Entropy-coded bytes of the synthetic scan: a stuffed 0xFF and one restart marker
pub const SCAN_DATA: &[u8] = &[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56];

/// Marker segments every synthetic JPEG carries after the caller's segments
macro_rules! define_frame {
    ($($name:ident => ($marker:expr, $payload:expr)),* $(,)?) => {
        $(
            pub const $name: &[u8] = $payload;
        )*

        fn frame_segments() -> Vec<Segment> {
            vec![$(Segment::new($marker, $payload.to_vec())),*]
        }
    };
}

define_frame!(
    // One 8-bit table of ones
    DQT_PAYLOAD => (marker::DQT, &[
        0x00, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
        1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    ]),
    // Baseline, 8x8, one component
    SOF0_PAYLOAD => (marker::SOF0, &[8, 0, 8, 0, 8, 1, 1, 0x11, 0]),
    // DC table 0 with a single 1-bit code
    DHT_PAYLOAD => (marker::DHT, &[0x00, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
    SOS_PAYLOAD => (marker::SOS, &[1, 1, 0x00, 0, 63, 0]),
);

/// JFIF 1.01 APP0 without a thumbnail
pub fn jfif_segment() -> Segment {
    Segment::with_identifier(marker::APP0, id::JFIF, &[1, 1, 0, 0, 1, 0, 1, 0, 0])
}

/// A complete JPEG: SOI, `segments`, tables, an 8x8 frame, one scan and EOI
pub fn build_jpeg(segments: &[Segment]) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    for segment in segments.iter().cloned().chain(frame_segments()) {
        data.extend_from_slice(&segment.marker.to_be_bytes());
        data.extend_from_slice(&((segment.payload.len() + 2) as u16).to_be_bytes());
        data.extend_from_slice(&segment.payload);
    }
    data.extend_from_slice(SCAN_DATA);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// The smallest useful JPEG: JFIF APP0 plus the frame
pub fn minimal_jpeg() -> Vec<u8> {
    build_jpeg(&[jfif_segment()])
}

/// An APPn/COM segment with `identifier` followed by `body`
pub fn app_segment(marker: u16, identifier: &[u8], body: &[u8]) -> Segment {
    Segment::with_identifier(marker, identifier, body)
}

/// Codec stand-in: decodes anything to an 8x8 gray bitmap and encodes to
/// [`minimal_jpeg`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MockCodec;

impl BitmapCodec for MockCodec {
    fn decode(&self, _data: &[u8]) -> Result<PixelBuffer> {
        PixelBuffer::new(8, 8, vec![0xFF80_8080; 64])
    }

    fn scale(&self, bitmap: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer> {
        let fill = bitmap.pixels().first().copied().unwrap_or(0);
        PixelBuffer::new(width, height, vec![fill; (width * height) as usize])
    }

    fn encode_jpeg(&self, _bitmap: &PixelBuffer, _quality: u8) -> Result<Vec<u8>> {
        Ok(minimal_jpeg())
    }
}

#[derive(Debug, Clone)]
enum Value {
    Short(u16),
    Long(u32),
    Ascii(Vec<u8>),
    Rational(u32, u32),
    Undefined([u8; 4]),
}

impl Value {
    fn type_and_count(&self) -> (u16, u32) {
        match self {
            Value::Short(_) => (3, 1),
            Value::Long(_) => (4, 1),
            Value::Ascii(s) => (2, s.len() as u32),
            Value::Rational(..) => (5, 1),
            Value::Undefined(_) => (7, 4),
        }
    }

    /// Bytes stored after the directory, padded to a word boundary
    fn external_len(&self) -> usize {
        match self {
            Value::Ascii(s) if s.len() > 4 => s.len() + s.len() % 2,
            Value::Rational(..) => 8,
            _ => 0,
        }
    }
}

struct Entry {
    tag: u16,
    value: Value,
}

fn put16(buf: &mut Vec<u8>, order: ByteOrder, v: u16) {
    match order {
        ByteOrder::LittleEndian => buf.extend_from_slice(&v.to_le_bytes()),
        ByteOrder::BigEndian => buf.extend_from_slice(&v.to_be_bytes()),
    }
}

fn put32(buf: &mut Vec<u8>, order: ByteOrder, v: u32) {
    match order {
        ByteOrder::LittleEndian => buf.extend_from_slice(&v.to_le_bytes()),
        ByteOrder::BigEndian => buf.extend_from_slice(&v.to_be_bytes()),
    }
}

fn directory_len(entries: &[Entry]) -> usize {
    2 + entries.len() * 12 + 4 + entries.iter().map(|e| e.value.external_len()).sum::<usize>()
}

/// Append a directory at the end of `buf` with its out-of-line values right after it
fn write_directory(buf: &mut Vec<u8>, order: ByteOrder, entries: &[Entry], next: u32) {
    let start = buf.len();
    let mut external = start + 2 + entries.len() * 12 + 4;
    let mut tail = Vec::new();

    put16(buf, order, entries.len() as u16);
    for entry in entries {
        let (field_type, count) = entry.value.type_and_count();
        put16(buf, order, entry.tag);
        put16(buf, order, field_type);
        put32(buf, order, count);
        match &entry.value {
            Value::Short(v) => {
                put16(buf, order, *v);
                put16(buf, order, 0);
            }
            Value::Long(v) => put32(buf, order, *v),
            Value::Undefined(bytes) => buf.extend_from_slice(bytes),
            Value::Ascii(s) if s.len() <= 4 => {
                let mut inline = [0u8; 4];
                inline[..s.len()].copy_from_slice(s);
                buf.extend_from_slice(&inline);
            }
            Value::Ascii(s) => {
                put32(buf, order, external as u32);
                tail.extend_from_slice(s);
                if s.len() % 2 == 1 {
                    tail.push(0);
                }
                external += entry.value.external_len();
            }
            Value::Rational(n, d) => {
                put32(buf, order, external as u32);
                put32(&mut tail, order, *n);
                put32(&mut tail, order, *d);
                external += 8;
            }
        }
    }
    put32(buf, order, next);
    buf.extend_from_slice(&tail);
}

/// One page of a synthetic striped TIFF
///
/// Pages are 8-bit grayscale, uncompressed, a single strip filled with
/// [`TiffPage::fill_byte`] of their index.
#[derive(Debug, Clone)]
pub struct TiffPage {
    width: u32,
    height: u32,
    exif: bool,
    ascii: Vec<(u16, String)>,
}

impl TiffPage {
    pub fn gray(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            exif: false,
            ascii: Vec::new(),
        }
    }

    /// Add an EXIF SubIFD with ExposureTime 1/125 and ExifVersion "0230"
    pub fn with_exif(mut self) -> Self {
        self.exif = true;
        self
    }

    /// Add an ASCII field to the page directory
    pub fn with_ascii(mut self, tag: u16, value: &str) -> Self {
        self.ascii.push((tag, value.to_string()));
        self
    }

    /// Strip fill value of page `index`
    pub fn fill_byte(index: usize) -> u8 {
        0x10 + index as u8
    }

    fn strip_len(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn entries(&self, strip_offset: u32, exif_offset: u32) -> Vec<Entry> {
        let mut entries = vec![
            Entry { tag: 0x0100, value: Value::Long(self.width) },
            Entry { tag: 0x0101, value: Value::Long(self.height) },
            Entry { tag: 0x0102, value: Value::Short(8) },
            Entry { tag: 0x0103, value: Value::Short(1) },
            Entry { tag: 0x0106, value: Value::Short(1) },
            Entry { tag: 0x0111, value: Value::Long(strip_offset) },
            Entry { tag: 0x0115, value: Value::Short(1) },
            Entry { tag: 0x0116, value: Value::Long(self.height) },
            Entry { tag: 0x0117, value: Value::Long(self.strip_len() as u32) },
        ];
        if self.exif {
            entries.push(Entry { tag: 0x8769, value: Value::Long(exif_offset) });
        }
        for (tag, text) in &self.ascii {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            entries.push(Entry { tag: *tag, value: Value::Ascii(bytes) });
        }
        entries.sort_by_key(|e| e.tag);
        entries
    }
}

fn exif_entries() -> Vec<Entry> {
    vec![
        Entry { tag: 0x829A, value: Value::Rational(1, 125) },
        Entry { tag: 0x9000, value: Value::Undefined(*b"0230") },
    ]
}

/// A complete TIFF with `pages` chained in order
///
/// Each page is laid out as directory, EXIF SubIFD, then strip.
pub fn build_tiff(order: ByteOrder, pages: &[TiffPage]) -> Vec<u8> {
    let mut data = order.marker().to_vec();
    put16(&mut data, order, 0x002A);
    put32(&mut data, order, 8);

    for (index, page) in pages.iter().enumerate() {
        let start = data.len();
        let directory = directory_len(&page.entries(0, 0));
        let exif_len = if page.exif { directory_len(&exif_entries()) } else { 0 };
        let exif_offset = start + directory;
        let strip_offset = exif_offset + exif_len;
        let end = strip_offset + page.strip_len();
        let next = if index + 1 < pages.len() { (end + end % 2) as u32 } else { 0 };

        write_directory(&mut data, order, &page.entries(strip_offset as u32, exif_offset as u32), next);
        if page.exif {
            write_directory(&mut data, order, &exif_entries(), 0);
        }
        data.resize(end, TiffPage::fill_byte(index));
        if end % 2 == 1 {
            data.push(0);
        }
    }
    data
}
