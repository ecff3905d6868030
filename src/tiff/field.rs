//! Typed TIFF field values
//!
//! A directory entry is 12 bytes: tag (2), type (2), count (4) and a 4-byte
//! slot. Values whose encoded size is at most 4 bytes live in the slot itself;
//! larger values live elsewhere in the stream and the slot holds their offset.

use crate::{
    error::{Error, Result},
    io::ByteOrder,
    segment::MAX_SEGMENT_SIZE,
};
use std::io::Cursor;

/// On-disk field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    Ifd = 13,
}

impl FieldType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Size of one element in bytes
    pub fn element_size(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational | FieldType::SRational | FieldType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Byte => "BYTE",
            FieldType::Ascii => "ASCII",
            FieldType::Short => "SHORT",
            FieldType::Long => "LONG",
            FieldType::Rational => "RATIONAL",
            FieldType::SByte => "SBYTE",
            FieldType::Undefined => "UNDEFINED",
            FieldType::SShort => "SSHORT",
            FieldType::SLong => "SLONG",
            FieldType::SRational => "SRATIONAL",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Ifd => "IFD",
        }
    }
}

/// Decoded value of a directory entry
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Byte(Vec<u8>),
    /// Raw ASCII bytes, including any NUL terminators
    Ascii(Vec<u8>),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<(u32, u32)>),
    SByte(Vec<i8>),
    Undefined(Vec<u8>),
    SShort(Vec<i16>),
    SLong(Vec<i32>),
    SRational(Vec<(i32, i32)>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ifd(Vec<u32>),
    /// Entry with a type code this crate does not know, kept verbatim
    Unknown {
        type_code: u16,
        count: u32,
        raw: [u8; 4],
    },
}

impl FieldValue {
    /// NUL-terminated ASCII value
    pub fn ascii(text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        FieldValue::Ascii(bytes)
    }

    pub fn short(value: u16) -> Self {
        FieldValue::Short(vec![value])
    }

    pub fn long(value: u32) -> Self {
        FieldValue::Long(vec![value])
    }

    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Ascii(_) => FieldType::Ascii,
            FieldValue::Short(_) => FieldType::Short,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Rational(_) => FieldType::Rational,
            FieldValue::SByte(_) => FieldType::SByte,
            FieldValue::Undefined(_) => FieldType::Undefined,
            FieldValue::SShort(_) => FieldType::SShort,
            FieldValue::SLong(_) => FieldType::SLong,
            FieldValue::SRational(_) => FieldType::SRational,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Ifd(_) => FieldType::Ifd,
            FieldValue::Unknown { .. } => return None,
        })
    }

    /// Type code written into the directory entry
    pub fn type_code(&self) -> u16 {
        match self {
            FieldValue::Unknown { type_code, .. } => *type_code,
            other => other.field_type().map_or(0, FieldType::code),
        }
    }

    /// Number of elements
    pub fn count(&self) -> u32 {
        let count = match self {
            FieldValue::Byte(v) | FieldValue::Ascii(v) | FieldValue::Undefined(v) => v.len(),
            FieldValue::Short(v) => v.len(),
            FieldValue::Long(v) | FieldValue::Ifd(v) => v.len(),
            FieldValue::Rational(v) => v.len(),
            FieldValue::SByte(v) => v.len(),
            FieldValue::SShort(v) => v.len(),
            FieldValue::SLong(v) => v.len(),
            FieldValue::SRational(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::Double(v) => v.len(),
            FieldValue::Unknown { count, .. } => return *count,
        };
        count as u32
    }

    /// Encoded size in bytes
    pub fn byte_len(&self) -> usize {
        match self.field_type() {
            Some(field_type) => self.count() as usize * field_type.element_size(),
            None => 4,
        }
    }

    /// Whether the value fits in the 4-byte entry slot
    pub fn fits_inline(&self) -> bool {
        self.byte_len() <= 4
    }

    /// Unsigned integer view of BYTE/SHORT/LONG/IFD values
    pub fn as_u32s(&self) -> Option<Vec<u32>> {
        match self {
            FieldValue::Byte(v) | FieldValue::Undefined(v) => {
                Some(v.iter().map(|&b| b as u32).collect())
            }
            FieldValue::Short(v) => Some(v.iter().map(|&s| s as u32).collect()),
            FieldValue::Long(v) | FieldValue::Ifd(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// First unsigned integer of the value
    pub fn first_u32(&self) -> Option<u32> {
        self.as_u32s().and_then(|v| v.first().copied())
    }

    /// Raw byte view of BYTE/UNDEFINED/ASCII values
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Byte(v) | FieldValue::Undefined(v) | FieldValue::Ascii(v) => Some(v),
            _ => None,
        }
    }

    /// ASCII value with trailing NULs removed
    pub fn as_string(&self) -> Option<String> {
        match self {
            FieldValue::Ascii(v) => {
                let end = v.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Some(String::from_utf8_lossy(&v[..end]).into_owned())
            }
            _ => None,
        }
    }

    /// Encode the value in the given byte order
    pub fn encode(&self, order: ByteOrder) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.byte_len());
        match self {
            FieldValue::Byte(v) | FieldValue::Ascii(v) | FieldValue::Undefined(v) => {
                out.extend_from_slice(v)
            }
            FieldValue::SByte(v) => out.extend(v.iter().map(|&b| b as u8)),
            FieldValue::Short(v) => {
                for &s in v {
                    order.write_u16(&mut out, s)?;
                }
            }
            FieldValue::SShort(v) => {
                for &s in v {
                    order.write_i16(&mut out, s)?;
                }
            }
            FieldValue::Long(v) | FieldValue::Ifd(v) => {
                for &l in v {
                    order.write_u32(&mut out, l)?;
                }
            }
            FieldValue::SLong(v) => {
                for &l in v {
                    order.write_i32(&mut out, l)?;
                }
            }
            FieldValue::Rational(v) => {
                for &(n, d) in v {
                    order.write_u32(&mut out, n)?;
                    order.write_u32(&mut out, d)?;
                }
            }
            FieldValue::SRational(v) => {
                for &(n, d) in v {
                    order.write_i32(&mut out, n)?;
                    order.write_i32(&mut out, d)?;
                }
            }
            FieldValue::Float(v) => {
                for &f in v {
                    order.write_f32(&mut out, f)?;
                }
            }
            FieldValue::Double(v) => {
                for &d in v {
                    order.write_f64(&mut out, d)?;
                }
            }
            FieldValue::Unknown { raw, .. } => out.extend_from_slice(raw),
        }
        Ok(out)
    }

    /// Decode `count` elements of `field_type` from `bytes`
    pub fn decode(field_type: FieldType, count: u32, bytes: &[u8], order: ByteOrder) -> Result<Self> {
        let count = count as usize;
        let needed = count.saturating_mul(field_type.element_size());
        if needed as u64 > MAX_SEGMENT_SIZE {
            return Err(Error::DataTooLarge {
                size: needed,
                max: MAX_SEGMENT_SIZE as usize,
            });
        }
        if bytes.len() < needed {
            return Err(Error::Truncated(format!(
                "{} field needs {} bytes, found {}",
                field_type.name(),
                needed,
                bytes.len()
            )));
        }
        let bytes = &bytes[..needed];
        let mut cur = Cursor::new(bytes);

        macro_rules! collect {
            ($read:expr) => {{
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push($read(&mut cur)?);
                }
                values
            }};
        }

        Ok(match field_type {
            FieldType::Byte => FieldValue::Byte(bytes.to_vec()),
            FieldType::Ascii => FieldValue::Ascii(bytes.to_vec()),
            FieldType::Undefined => FieldValue::Undefined(bytes.to_vec()),
            FieldType::SByte => FieldValue::SByte(bytes.iter().map(|&b| b as i8).collect()),
            FieldType::Short => FieldValue::Short(collect!(|c: &mut Cursor<&[u8]>| order.read_u16(c))),
            FieldType::SShort => FieldValue::SShort(collect!(|c: &mut Cursor<&[u8]>| order.read_i16(c))),
            FieldType::Long => FieldValue::Long(collect!(|c: &mut Cursor<&[u8]>| order.read_u32(c))),
            FieldType::Ifd => FieldValue::Ifd(collect!(|c: &mut Cursor<&[u8]>| order.read_u32(c))),
            FieldType::SLong => FieldValue::SLong(collect!(|c: &mut Cursor<&[u8]>| order.read_i32(c))),
            FieldType::Float => FieldValue::Float(collect!(|c: &mut Cursor<&[u8]>| order.read_f32(c))),
            FieldType::Double => FieldValue::Double(collect!(|c: &mut Cursor<&[u8]>| order.read_f64(c))),
            FieldType::Rational => FieldValue::Rational(collect!(|c: &mut Cursor<&[u8]>| {
                Ok::<_, std::io::Error>((order.read_u32(c)?, order.read_u32(c)?))
            })),
            FieldType::SRational => FieldValue::SRational(collect!(|c: &mut Cursor<&[u8]>| {
                Ok::<_, std::io::Error>((order.read_i32(c)?, order.read_i32(c)?))
            })),
        })
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MAX_SHOWN: usize = 16;

        fn list<T: std::fmt::Display>(f: &mut std::fmt::Formatter<'_>, v: &[T]) -> std::fmt::Result {
            let shown: Vec<String> = v.iter().take(MAX_SHOWN).map(|x| x.to_string()).collect();
            write!(f, "[{}", shown.join(", "))?;
            if v.len() > MAX_SHOWN {
                write!(f, ", ... ({} more)", v.len() - MAX_SHOWN)?;
            }
            write!(f, "]")
        }

        match self {
            FieldValue::Ascii(_) => write!(f, "{}", self.as_string().unwrap_or_default()),
            FieldValue::Byte(v) | FieldValue::Undefined(v) => list(f, v),
            FieldValue::SByte(v) => list(f, v),
            FieldValue::Short(v) => list(f, v),
            FieldValue::SShort(v) => list(f, v),
            FieldValue::Long(v) | FieldValue::Ifd(v) => list(f, v),
            FieldValue::SLong(v) => list(f, v),
            FieldValue::Float(v) => list(f, v),
            FieldValue::Double(v) => list(f, v),
            FieldValue::Rational(v) => {
                let v: Vec<String> = v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect();
                list(f, &v)
            }
            FieldValue::SRational(v) => {
                let v: Vec<String> = v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect();
                list(f, &v)
            }
            FieldValue::Unknown { type_code, count, .. } => {
                write!(f, "<unknown type {} x {}>", type_code, count)
            }
        }
    }
}

/// A directory entry: tag plus typed value
///
/// `data_offset` is where the value was last read from or written to: the
/// entry's own value slot for inline values, otherwise the external offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffField {
    tag: u16,
    value: FieldValue,
    data_offset: Option<u32>,
}

impl TiffField {
    pub fn new(tag: u16, value: FieldValue) -> Self {
        Self {
            tag,
            value,
            data_offset: None,
        }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut FieldValue {
        &mut self.value
    }

    pub fn into_value(self) -> FieldValue {
        self.value
    }

    pub fn count(&self) -> u32 {
        self.value.count()
    }

    pub fn data_offset(&self) -> Option<u32> {
        self.data_offset
    }

    pub(crate) fn set_data_offset(&mut self, offset: u32) {
        self.data_offset = Some(offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_decision() {
        assert!(FieldValue::Short(vec![1, 2]).fits_inline());
        assert!(!FieldValue::Short(vec![1, 2, 3]).fits_inline());
        assert!(FieldValue::long(7).fits_inline());
        assert!(!FieldValue::Rational(vec![(1, 2)]).fits_inline());
        assert_eq!(FieldValue::ascii("abc").byte_len(), 4);
        assert_eq!(FieldValue::Double(vec![1.0, 2.0]).byte_len(), 16);
    }

    #[test]
    fn test_encode_decode_little_endian() {
        let value = FieldValue::Short(vec![0x0102, 0x0304]);
        let bytes = value.encode(ByteOrder::LittleEndian).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x04, 0x03]);
        let back = FieldValue::decode(FieldType::Short, 2, &bytes, ByteOrder::LittleEndian).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_decode_rational_big_endian() {
        let bytes = [0, 0, 0, 72, 0, 0, 0, 1];
        let value = FieldValue::decode(FieldType::Rational, 1, &bytes, ByteOrder::BigEndian).unwrap();
        assert_eq!(value, FieldValue::Rational(vec![(72, 1)]));
        assert_eq!(value.to_string(), "[72/1]");
    }

    #[test]
    fn test_decode_short_buffer_is_truncated() {
        let err = FieldValue::decode(FieldType::Long, 2, &[0, 0, 0, 1], ByteOrder::BigEndian).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }

    #[test]
    fn test_ascii_helpers() {
        let value = FieldValue::ascii("Canon");
        assert_eq!(value.count(), 6);
        assert_eq!(value.as_string().as_deref(), Some("Canon"));
    }
}
