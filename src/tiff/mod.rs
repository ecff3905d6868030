//! TIFF-family directory model
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), magic (0x002A), offset of the first IFD
//! - IFD (Image File Directory): tag count, tags (12 bytes each), next IFD offset
//! - Tags: tag ID (2), type (2), count (4), value/offset (4)
//!
//! The same structure is embedded in JPEG EXIF segments, so the model here is
//! shared by the TIFF container handler and the EXIF codec.

pub mod field;
pub mod ifd;
pub mod tag;

pub use field::{FieldType, FieldValue, TiffField};
pub use ifd::{read_ifd, read_ifds, Ifd, MAX_IFD_TAGS};
pub use tag::{describe_tag, ExifTag, GpsTag, InteropTag, Namespace, TagSet, TiffTag};

use crate::{
    error::{Error, Result},
    io::ByteOrder,
};
use std::io::{Read, Write};

/// TIFF magic number following the byte order marker
pub const TIFF_MAGIC: u16 = 0x002A;

/// Offset at which rewritten streams start placing data, right after the header
pub const FIRST_WRITE_OFFSET: u32 = 8;

/// Read a TIFF header, returning the byte order and the first IFD offset
pub fn read_header<R: Read>(reader: &mut R) -> Result<(ByteOrder, u32)> {
    let mut marker = [0u8; 2];
    reader.read_exact(&mut marker)?;
    let order = ByteOrder::from_marker(marker)?;
    let magic = order.read_u16(reader)?;
    if magic != TIFF_MAGIC {
        return Err(Error::InvalidFormat(format!("Invalid TIFF magic: 0x{:04X}", magic)));
    }
    let first_ifd = order.read_u32(reader)?;
    Ok((order, first_ifd))
}

/// Write a TIFF header with a placeholder first IFD offset
pub fn write_header<W: Write>(writer: &mut W, order: ByteOrder, first_ifd: u32) -> Result<()> {
    writer.write_all(&order.marker())?;
    order.write_u16(writer, TIFF_MAGIC)?;
    order.write_u32(writer, first_ifd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_round_trip() {
        let mut out = Vec::new();
        write_header(&mut out, ByteOrder::LittleEndian, 8).unwrap();
        assert_eq!(out, vec![b'I', b'I', 0x2A, 0x00, 8, 0, 0, 0]);
        let (order, first) = read_header(&mut Cursor::new(out)).unwrap();
        assert_eq!(order, ByteOrder::LittleEndian);
        assert_eq!(first, 8);
    }

    #[test]
    fn test_bad_magic() {
        let data = vec![b'M', b'M', 0x00, 0x2B, 0, 0, 0, 8];
        assert!(matches!(
            read_header(&mut Cursor::new(data)),
            Err(Error::InvalidFormat(_))
        ));
    }
}
