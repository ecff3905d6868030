//! Runtime-selected byte order for TIFF-family data
//!
//! JPEG is always big-endian, but a TIFF stream (including the TIFF blob inside
//! an EXIF APP1 segment) declares its byte order in the first two header bytes.

use crate::error::{Error, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Byte order of a TIFF stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Little-endian byte order (II)
    LittleEndian,
    /// Big-endian byte order (MM)
    #[default]
    BigEndian,
}

impl ByteOrder {
    /// Detect the byte order from the two marker bytes of a TIFF header
    pub fn from_marker(marker: [u8; 2]) -> Result<Self> {
        match &marker {
            b"II" => Ok(ByteOrder::LittleEndian),
            b"MM" => Ok(ByteOrder::BigEndian),
            _ => Err(Error::InvalidFormat(format!(
                "Invalid TIFF byte order marker: {:02X}{:02X}",
                marker[0], marker[1]
            ))),
        }
    }

    /// The two marker bytes written at the start of a TIFF header
    pub fn marker(&self) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => *b"II",
            ByteOrder::BigEndian => *b"MM",
        }
    }

    /// Returns a string representation of this byte order
    pub fn name(&self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "Little Endian (II)",
            ByteOrder::BigEndian => "Big Endian (MM)",
        }
    }

    pub fn read_u16<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<u16> {
        match self {
            ByteOrder::LittleEndian => reader.read_u16::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_u16::<BigEndian>(),
        }
    }

    pub fn read_u32<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<u32> {
        match self {
            ByteOrder::LittleEndian => reader.read_u32::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_u32::<BigEndian>(),
        }
    }

    pub fn read_i16<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<i16> {
        match self {
            ByteOrder::LittleEndian => reader.read_i16::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_i16::<BigEndian>(),
        }
    }

    pub fn read_i32<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<i32> {
        match self {
            ByteOrder::LittleEndian => reader.read_i32::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_i32::<BigEndian>(),
        }
    }

    pub fn read_f32<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<f32> {
        match self {
            ByteOrder::LittleEndian => reader.read_f32::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_f32::<BigEndian>(),
        }
    }

    pub fn read_f64<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<f64> {
        match self {
            ByteOrder::LittleEndian => reader.read_f64::<LittleEndian>(),
            ByteOrder::BigEndian => reader.read_f64::<BigEndian>(),
        }
    }

    pub fn write_u16<W: Write + ?Sized>(&self, writer: &mut W, value: u16) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_u16::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_u16::<BigEndian>(value),
        }
    }

    pub fn write_u32<W: Write + ?Sized>(&self, writer: &mut W, value: u32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_u32::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_u32::<BigEndian>(value),
        }
    }

    pub fn write_i16<W: Write + ?Sized>(&self, writer: &mut W, value: i16) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_i16::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_i16::<BigEndian>(value),
        }
    }

    pub fn write_i32<W: Write + ?Sized>(&self, writer: &mut W, value: i32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_i32::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_i32::<BigEndian>(value),
        }
    }

    pub fn write_f32<W: Write + ?Sized>(&self, writer: &mut W, value: f32) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_f32::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_f32::<BigEndian>(value),
        }
    }

    pub fn write_f64<W: Write + ?Sized>(&self, writer: &mut W, value: f64) -> io::Result<()> {
        match self {
            ByteOrder::LittleEndian => writer.write_f64::<LittleEndian>(value),
            ByteOrder::BigEndian => writer.write_f64::<BigEndian>(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_byte_order() {
        assert_eq!(ByteOrder::from_marker(*b"II").unwrap(), ByteOrder::LittleEndian);
        assert_eq!(ByteOrder::from_marker(*b"MM").unwrap(), ByteOrder::BigEndian);
        assert!(ByteOrder::from_marker(*b"XX").is_err());

        let mut le = Cursor::new(vec![0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(ByteOrder::LittleEndian.read_u16(&mut le).unwrap(), 0x1234);
        assert_eq!(ByteOrder::LittleEndian.read_u32(&mut le).unwrap(), 0x12345678);

        let mut out = Vec::new();
        ByteOrder::BigEndian.write_u32(&mut out, 0x0A0B0C0D).unwrap();
        assert_eq!(out, vec![0x0A, 0x0B, 0x0C, 0x0D]);
    }
}
