//! JPEG marker segments
//!
//! A JPEG stream is a sequence of `0xFF <marker>` codes. Most markers carry a
//! big-endian 16-bit length (which counts itself) followed by a payload;
//! stand-alone markers (SOI, EOI, TEM, RSTn, JPGn) carry nothing. APPn payloads
//! start with an identifier string naming what they hold.

use crate::error::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

/// Maximum size for a single segment or field value to prevent DOS attacks (256 MB)
///
/// This prevents malicious files from requesting multi-GB allocations.
pub const MAX_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Largest payload a length-prefixed JPEG segment can hold
pub const MAX_SEGMENT_PAYLOAD: usize = 65533;

/// JPEG marker codes
pub mod marker {
    pub const TEM: u16 = 0xFF01; // Temporary arithmetic coding
    pub const SOF0: u16 = 0xFFC0; // Baseline DCT
    pub const SOF15: u16 = 0xFFCF; // Differential lossless, arithmetic
    pub const DHT: u16 = 0xFFC4; // Huffman tables
    pub const JPG: u16 = 0xFFC8; // Reserved for extensions
    pub const DAC: u16 = 0xFFCC; // Arithmetic conditioning
    pub const RST0: u16 = 0xFFD0;
    pub const RST7: u16 = 0xFFD7;
    pub const SOI: u16 = 0xFFD8; // Start of Image
    pub const EOI: u16 = 0xFFD9; // End of Image
    pub const SOS: u16 = 0xFFDA; // Start of Scan (image data follows)
    pub const DQT: u16 = 0xFFDB; // Quantization tables
    pub const DRI: u16 = 0xFFDD; // Restart interval
    pub const APP0: u16 = 0xFFE0; // JFIF / JFXX
    pub const APP1: u16 = 0xFFE1; // EXIF / XMP
    pub const APP2: u16 = 0xFFE2; // ICC profile
    pub const APP12: u16 = 0xFFEC; // Ducky / picture info
    pub const APP13: u16 = 0xFFED; // Photoshop IRB
    pub const APP14: u16 = 0xFFEE; // Adobe
    pub const APP15: u16 = 0xFFEF;
    pub const JPG0: u16 = 0xFFF0;
    pub const JPG13: u16 = 0xFFFD;
    pub const COM: u16 = 0xFFFE; // Comment
    /// Fill byte pair; 0xFF may repeat before a real marker
    pub const PADDING: u16 = 0xFFFF;
}

/// APPn payload identifiers
pub mod id {
    pub const JFIF: &[u8] = b"JFIF\0";
    pub const JFXX: &[u8] = b"JFXX\0";
    pub const EXIF: &[u8] = b"Exif\0\0";
    pub const XMP: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
    /// Written by some tools in place of the standard XMP identifier
    pub const NON_STANDARD_XMP: &[u8] = b"XMP\0://ns.adobe.com/xap/1.0/\0";
    pub const XMP_EXTENSION: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
    pub const ICC_PROFILE: &[u8] = b"ICC_PROFILE\0";
    pub const PHOTOSHOP: &[u8] = b"Photoshop 3.0\0";
    pub const ADOBE: &[u8] = b"Adobe";
    pub const DUCKY: &[u8] = b"Ducky";
    pub const PICTURE_INFO: &[u8] = b"[picture info]";
}

/// Get human-readable label for a JPEG marker
pub fn marker_label(code: u16) -> &'static str {
    match code {
        marker::SOI => "SOI",
        marker::EOI => "EOI",
        marker::SOS => "SOS",
        marker::DQT => "DQT",
        marker::DHT => "DHT",
        marker::DRI => "DRI",
        marker::DAC => "DAC",
        marker::COM => "COM",
        marker::TEM => "TEM",
        marker::JPG => "JPG",
        0xFFC0 => "SOF0",
        0xFFC1 => "SOF1",
        0xFFC2 => "SOF2",
        0xFFC3 => "SOF3",
        0xFFC5..=marker::SOF15 => "SOFn",
        marker::RST0..=marker::RST7 => "RSTn",
        0xFFE0 => "APP0",
        0xFFE1 => "APP1",
        0xFFE2 => "APP2",
        0xFFE3..=0xFFEB => "APPn",
        0xFFEC => "APP12",
        0xFFED => "APP13",
        0xFFEE => "APP14",
        0xFFEF => "APP15",
        marker::JPG0..=marker::JPG13 => "JPGn",
        _ => "OTHER",
    }
}

/// Markers that are not followed by a length field
pub fn is_standalone(code: u16) -> bool {
    matches!(
        code,
        marker::SOI
            | marker::EOI
            | marker::TEM
            | marker::JPG
            | marker::RST0..=marker::RST7
            | marker::JPG0..=marker::JPG13
    )
}

/// Start-of-frame markers (excluding DHT, JPG and DAC which share the range)
pub fn is_sof(code: u16) -> bool {
    (marker::SOF0..=marker::SOF15).contains(&code)
        && code != marker::DHT
        && code != marker::JPG
        && code != marker::DAC
}

/// One marker segment
///
/// For an SOS segment, `scan_data` holds the entropy-coded bytes that follow
/// the scan header (stuffed bytes and RSTn markers included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: u16,
    /// Declared length as read; `None` for stand-alone markers
    pub length: Option<u16>,
    pub payload: Vec<u8>,
    pub scan_data: Vec<u8>,
}

impl Segment {
    /// Create a length-prefixed segment
    pub fn new(marker: u16, payload: Vec<u8>) -> Self {
        let length = u16::try_from(payload.len() + 2).ok();
        Self {
            marker,
            length,
            payload,
            scan_data: Vec::new(),
        }
    }

    /// Create an APPn/COM segment from an identifier and a body
    pub fn with_identifier(marker: u16, identifier: &[u8], body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(identifier.len() + body.len());
        payload.extend_from_slice(identifier);
        payload.extend_from_slice(body);
        Self::new(marker, payload)
    }

    /// Create a stand-alone marker segment
    pub fn standalone(marker: u16) -> Self {
        Self {
            marker,
            length: None,
            payload: Vec::new(),
            scan_data: Vec::new(),
        }
    }

    /// Whether the payload starts with `identifier`
    pub fn has_identifier(&self, identifier: &[u8]) -> bool {
        self.payload.starts_with(identifier)
    }

    /// Payload bytes after `identifier`, if the payload starts with it
    pub fn body_after(&self, identifier: &[u8]) -> Option<&[u8]> {
        self.payload.strip_prefix(identifier)
    }

    /// Serialize the segment, recomputing its length from the payload
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.marker)?;
        if self.length.is_some() || !is_standalone(self.marker) {
            if self.payload.len() > MAX_SEGMENT_PAYLOAD {
                return Err(Error::DataTooLarge {
                    size: self.payload.len(),
                    max: MAX_SEGMENT_PAYLOAD,
                });
            }
            writer.write_u16::<BigEndian>((self.payload.len() + 2) as u16)?;
            writer.write_all(&self.payload)?;
        }
        writer.write_all(&self.scan_data)?;
        Ok(())
    }
}
