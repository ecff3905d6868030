//! Small fixed-layout APPn payloads: JFIF (APP0), Ducky (APP12), Adobe (APP14)

use crate::{
    error::{Error, Result},
    segment::{id, marker, Segment},
    thumbnail::{PixelBuffer, Thumbnail},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::io::{Cursor, Read, Write};

/// JFIF APP0 body (after `"JFIF\0"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jfif {
    pub major_version: u8,
    pub minor_version: u8,
    /// 0 = aspect ratio only, 1 = dots per inch, 2 = dots per cm
    pub density_unit: u8,
    pub x_density: u16,
    pub y_density: u16,
    thumbnail: Option<PixelBuffer>,
}

impl Default for Jfif {
    fn default() -> Self {
        Self {
            major_version: 1,
            minor_version: 2,
            density_unit: 1,
            x_density: 72,
            y_density: 72,
            thumbnail: None,
        }
    }
}

impl Jfif {
    /// Fixed part of the body: version, units, densities, thumbnail size
    pub const HEADER_LEN: usize = 9;

    pub fn new(density_unit: u8, x_density: u16, y_density: u16) -> Result<Self> {
        if density_unit > 2 {
            return Err(Error::InvalidFormat(format!(
                "JFIF density unit {} out of range [0-2]",
                density_unit
            )));
        }
        Ok(Self {
            density_unit,
            x_density,
            y_density,
            ..Self::default()
        })
    }

    /// Attach an uncompressed RGB thumbnail (at most 255x255)
    pub fn with_thumbnail(mut self, bitmap: PixelBuffer) -> Result<Self> {
        if bitmap.width() > 255 || bitmap.height() > 255 {
            return Err(Error::InvalidFormat(format!(
                "JFIF thumbnail {}x{} exceeds 255x255",
                bitmap.width(),
                bitmap.height()
            )));
        }
        self.thumbnail = Some(bitmap);
        Ok(self)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(Error::Truncated(format!("JFIF body is {} bytes", data.len())));
        }
        let mut cursor = Cursor::new(data);
        let major_version = cursor.read_u8()?;
        let minor_version = cursor.read_u8()?;
        let density_unit = cursor.read_u8()?;
        let x_density = cursor.read_u16::<BigEndian>()?;
        let y_density = cursor.read_u16::<BigEndian>()?;
        let width = cursor.read_u8()? as u32;
        let height = cursor.read_u8()? as u32;

        let thumbnail = if width != 0 && height != 0 {
            let rgb = &data[Self::HEADER_LEN..];
            let size = (3 * width * height) as usize;
            if rgb.len() < size {
                warn!("JFIF thumbnail truncated ({} of {} bytes)", rgb.len(), size);
                None
            } else {
                Some(PixelBuffer::from_packed(width, height, &rgb[..size], 3 * width as usize, false)?)
            }
        } else {
            None
        };

        Ok(Self {
            major_version,
            minor_version,
            density_unit,
            x_density,
            y_density,
            thumbnail,
        })
    }

    pub fn thumbnail_size(&self) -> (u32, u32) {
        self.thumbnail
            .as_ref()
            .map_or((0, 0), |t| (t.width(), t.height()))
    }

    pub fn thumbnail(&self) -> Option<Thumbnail> {
        self.thumbnail.clone().map(Thumbnail::raw)
    }

    pub fn density_unit_name(&self) -> &'static str {
        match self.density_unit {
            0 => "No units, aspect ratio only specified",
            1 => "Dots per inch",
            2 => "Dots per centimeter",
            _ => "Unknown",
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let (width, height) = self.thumbnail_size();
        writer.write_u8(self.major_version)?;
        writer.write_u8(self.minor_version)?;
        writer.write_u8(self.density_unit)?;
        writer.write_u16::<BigEndian>(self.x_density)?;
        writer.write_u16::<BigEndian>(self.y_density)?;
        writer.write_u8(width as u8)?;
        writer.write_u8(height as u8)?;
        if let Some(bitmap) = &self.thumbnail {
            writer.write_all(&bitmap.to_rgb())?;
        }
        Ok(())
    }

    /// Complete APP0 segment
    pub fn to_segment(&self) -> Result<Segment> {
        let mut body = Vec::new();
        self.write(&mut body)?;
        Ok(Segment::with_identifier(marker::APP0, id::JFIF, &body))
    }
}

/// Adobe APP14 body (after `"Adobe"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adobe {
    pub dct_encode_version: u16,
    pub flags0: u16,
    pub flags1: u16,
    /// 0 = RGB or CMYK, 1 = YCbCr, 2 = YCCK
    pub color_transform: u8,
}

impl Adobe {
    pub const LEN: usize = 7;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(Error::Truncated(format!("Adobe APP14 body is {} bytes", data.len())));
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            dct_encode_version: cursor.read_u16::<BigEndian>()?,
            flags0: cursor.read_u16::<BigEndian>()?,
            flags1: cursor.read_u16::<BigEndian>()?,
            color_transform: cursor.read_u8()?,
        })
    }

    pub fn color_transform_name(&self) -> &'static str {
        match self.color_transform {
            0 => "Unknown (RGB or CMYK)",
            1 => "YCbCr",
            2 => "YCCK",
            _ => "Unknown",
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.dct_encode_version)?;
        writer.write_u16::<BigEndian>(self.flags0)?;
        writer.write_u16::<BigEndian>(self.flags1)?;
        writer.write_u8(self.color_transform)?;
        Ok(())
    }
}

/// Ducky record tags
pub mod ducky_tag {
    pub const QUALITY: u16 = 1;
    pub const COMMENT: u16 = 2;
    pub const COPYRIGHT: u16 = 3;
}

/// One tag/size/value record of a Ducky APP12 body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuckyRecord {
    pub tag: u16,
    pub data: Vec<u8>,
}

impl DuckyRecord {
    pub fn name(&self) -> &'static str {
        match self.tag {
            ducky_tag::QUALITY => "Quality",
            ducky_tag::COMMENT => "Comment",
            ducky_tag::COPYRIGHT => "Copyright",
            _ => "Unknown",
        }
    }

    /// Human-readable value
    ///
    /// Quality is a big-endian u32; text records are a u32 character count
    /// followed by UTF-16BE.
    pub fn value_string(&self) -> String {
        match self.tag {
            ducky_tag::QUALITY if self.data.len() >= 4 => {
                u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]).to_string()
            }
            ducky_tag::COMMENT | ducky_tag::COPYRIGHT if self.data.len() >= 4 => {
                let units: Vec<u16> = self.data[4..]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units).trim_end_matches('\0').to_string()
            }
            _ => self.data.iter().map(|b| format!("{:02X}", b)).collect(),
        }
    }
}

/// Ducky APP12 body (after `"Ducky"`), written by "Save for Web"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ducky {
    records: Vec<DuckyRecord>,
}

impl Ducky {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut records = Vec::new();
        let mut cursor = Cursor::new(data);
        while cursor.position() + 4 <= data.len() as u64 {
            let tag = cursor.read_u16::<BigEndian>()?;
            if tag == 0 {
                break;
            }
            let size = cursor.read_u16::<BigEndian>()? as u64;
            let mut value = Vec::new();
            cursor.by_ref().take(size).read_to_end(&mut value)?;
            if (value.len() as u64) < size {
                return Err(Error::Truncated(format!("Ducky record {} value", tag)));
            }
            debug!("Ducky record {} ({} bytes)", tag, size);
            records.push(DuckyRecord { tag, data: value });
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[DuckyRecord] {
        &self.records
    }

    pub fn record(&self, tag: u16) -> Option<&DuckyRecord> {
        self.records.iter().find(|r| r.tag == tag)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        for record in &self.records {
            writer.write_u16::<BigEndian>(record.tag)?;
            writer.write_u16::<BigEndian>(record.data.len() as u16)?;
            writer.write_all(&record.data)?;
        }
        writer.write_u16::<BigEndian>(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jfif_with_thumbnail() {
        let bitmap = PixelBuffer::from_packed(2, 1, &[255, 0, 0, 0, 0, 255], 6, false).unwrap();
        let jfif = Jfif::new(1, 300, 300).unwrap().with_thumbnail(bitmap).unwrap();

        let mut body = Vec::new();
        jfif.write(&mut body).unwrap();
        assert_eq!(body.len(), Jfif::HEADER_LEN + 6);

        let parsed = Jfif::parse(&body).unwrap();
        assert_eq!(parsed, jfif);
        assert_eq!(parsed.thumbnail_size(), (2, 1));
        assert_eq!(parsed.density_unit_name(), "Dots per inch");
    }

    #[test]
    fn test_jfif_rejects_bad_unit_and_short_body() {
        assert!(Jfif::new(3, 1, 1).is_err());
        assert!(matches!(Jfif::parse(&[1, 2, 0]), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_adobe() {
        let adobe = Adobe::parse(&[0, 100, 0x40, 0, 0, 0, 1]).unwrap();
        assert_eq!(adobe.dct_encode_version, 100);
        assert_eq!(adobe.flags0, 0x4000);
        assert_eq!(adobe.color_transform_name(), "YCbCr");
        let mut out = Vec::new();
        adobe.write(&mut out).unwrap();
        assert_eq!(out, vec![0, 100, 0x40, 0, 0, 0, 1]);
    }

    #[test]
    fn test_ducky() {
        let mut data = vec![0, 1, 0, 4, 0, 0, 0, 80];
        data.extend_from_slice(&[0, 2, 0, 8, 0, 0, 0, 2, 0, b'H', 0, b'i']);
        data.extend_from_slice(&[0, 0]);

        let ducky = Ducky::parse(&data).unwrap();
        assert_eq!(ducky.records().len(), 2);
        assert_eq!(ducky.record(ducky_tag::QUALITY).unwrap().value_string(), "80");
        assert_eq!(ducky.record(ducky_tag::COMMENT).unwrap().value_string(), "Hi");

        let mut out = Vec::new();
        ducky.write(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
