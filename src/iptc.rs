//! IPTC-IIM data sets
//!
//! Each data set is `0x1C`, record number, data set number, a 16-bit
//! big-endian size and the value. A size with the high bit set is an
//! extended size: its low 15 bits give the byte count of the real length
//! that follows.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

/// Tag marker starting every data set
pub const TAG_MARKER: u8 = 0x1C;

/// Envelope record number
pub const ENVELOPE_RECORD: u8 = 1;
/// Application record number
pub const APPLICATION_RECORD: u8 = 2;

/// Well-known data sets, keyed by (record, data set number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IptcTag {
    CodedCharacterSet,
    RecordVersion,
    ObjectName,
    EditStatus,
    Urgency,
    SubjectReference,
    Category,
    SupplementalCategory,
    FixtureId,
    Keywords,
    ContentLocationCode,
    ContentLocationName,
    ReleaseDate,
    ReleaseTime,
    SpecialInstructions,
    DateCreated,
    TimeCreated,
    DigitalCreationDate,
    DigitalCreationTime,
    OriginatingProgram,
    ProgramVersion,
    ByLine,
    ByLineTitle,
    City,
    SubLocation,
    ProvinceState,
    CountryCode,
    CountryName,
    OriginalTransmissionReference,
    Headline,
    Credit,
    Source,
    CopyrightNotice,
    Contact,
    CaptionAbstract,
    WriterEditor,
    ImageType,
    ImageOrientation,
    LanguageIdentifier,
}

impl IptcTag {
    const ALL: [IptcTag; 39] = [
        IptcTag::CodedCharacterSet,
        IptcTag::RecordVersion,
        IptcTag::ObjectName,
        IptcTag::EditStatus,
        IptcTag::Urgency,
        IptcTag::SubjectReference,
        IptcTag::Category,
        IptcTag::SupplementalCategory,
        IptcTag::FixtureId,
        IptcTag::Keywords,
        IptcTag::ContentLocationCode,
        IptcTag::ContentLocationName,
        IptcTag::ReleaseDate,
        IptcTag::ReleaseTime,
        IptcTag::SpecialInstructions,
        IptcTag::DateCreated,
        IptcTag::TimeCreated,
        IptcTag::DigitalCreationDate,
        IptcTag::DigitalCreationTime,
        IptcTag::OriginatingProgram,
        IptcTag::ProgramVersion,
        IptcTag::ByLine,
        IptcTag::ByLineTitle,
        IptcTag::City,
        IptcTag::SubLocation,
        IptcTag::ProvinceState,
        IptcTag::CountryCode,
        IptcTag::CountryName,
        IptcTag::OriginalTransmissionReference,
        IptcTag::Headline,
        IptcTag::Credit,
        IptcTag::Source,
        IptcTag::CopyrightNotice,
        IptcTag::Contact,
        IptcTag::CaptionAbstract,
        IptcTag::WriterEditor,
        IptcTag::ImageType,
        IptcTag::ImageOrientation,
        IptcTag::LanguageIdentifier,
    ];

    /// (record, data set number, name, repeatable)
    fn info(self) -> (u8, u8, &'static str, bool) {
        match self {
            IptcTag::CodedCharacterSet => (1, 90, "Coded Character Set", false),
            IptcTag::RecordVersion => (2, 0, "Record Version", false),
            IptcTag::ObjectName => (2, 5, "Object Name", false),
            IptcTag::EditStatus => (2, 7, "Edit Status", false),
            IptcTag::Urgency => (2, 10, "Urgency", false),
            IptcTag::SubjectReference => (2, 12, "Subject Reference", true),
            IptcTag::Category => (2, 15, "Category", false),
            IptcTag::SupplementalCategory => (2, 20, "Supplemental Category", true),
            IptcTag::FixtureId => (2, 22, "Fixture Identifier", false),
            IptcTag::Keywords => (2, 25, "Keywords", true),
            IptcTag::ContentLocationCode => (2, 26, "Content Location Code", true),
            IptcTag::ContentLocationName => (2, 27, "Content Location Name", true),
            IptcTag::ReleaseDate => (2, 30, "Release Date", false),
            IptcTag::ReleaseTime => (2, 35, "Release Time", false),
            IptcTag::SpecialInstructions => (2, 40, "Special Instructions", false),
            IptcTag::DateCreated => (2, 55, "Date Created", false),
            IptcTag::TimeCreated => (2, 60, "Time Created", false),
            IptcTag::DigitalCreationDate => (2, 62, "Digital Creation Date", false),
            IptcTag::DigitalCreationTime => (2, 63, "Digital Creation Time", false),
            IptcTag::OriginatingProgram => (2, 65, "Originating Program", false),
            IptcTag::ProgramVersion => (2, 70, "Program Version", false),
            IptcTag::ByLine => (2, 80, "By-line", true),
            IptcTag::ByLineTitle => (2, 85, "By-line Title", true),
            IptcTag::City => (2, 90, "City", false),
            IptcTag::SubLocation => (2, 92, "Sub-location", false),
            IptcTag::ProvinceState => (2, 95, "Province/State", false),
            IptcTag::CountryCode => (2, 100, "Country Code", false),
            IptcTag::CountryName => (2, 101, "Country Name", false),
            IptcTag::OriginalTransmissionReference => (2, 103, "Original Transmission Reference", false),
            IptcTag::Headline => (2, 105, "Headline", false),
            IptcTag::Credit => (2, 110, "Credit", false),
            IptcTag::Source => (2, 115, "Source", false),
            IptcTag::CopyrightNotice => (2, 116, "Copyright Notice", false),
            IptcTag::Contact => (2, 118, "Contact", true),
            IptcTag::CaptionAbstract => (2, 120, "Caption/Abstract", false),
            IptcTag::WriterEditor => (2, 122, "Writer/Editor", true),
            IptcTag::ImageType => (2, 130, "Image Type", false),
            IptcTag::ImageOrientation => (2, 131, "Image Orientation", false),
            IptcTag::LanguageIdentifier => (2, 135, "Language Identifier", false),
        }
    }

    pub fn from_code(record: u8, tag: u8) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| matches!(t.info(), (r, n, _, _) if r == record && n == tag))
    }

    pub fn record(self) -> u8 {
        self.info().0
    }

    pub fn tag(self) -> u8 {
        self.info().1
    }

    pub fn name(self) -> &'static str {
        self.info().2
    }

    pub fn is_repeatable(self) -> bool {
        self.info().3
    }
}

/// One IPTC data set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IptcDataSet {
    record: u8,
    tag: u8,
    data: Vec<u8>,
}

impl IptcDataSet {
    pub fn new(record: u8, tag: u8, data: Vec<u8>) -> Self {
        Self { record, tag, data }
    }

    /// Data set for a well-known tag with a text value
    pub fn text(tag: IptcTag, value: &str) -> Self {
        Self::new(tag.record(), tag.tag(), value.as_bytes().to_vec())
    }

    pub fn record(&self) -> u8 {
        self.record
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn known_tag(&self) -> Option<IptcTag> {
        IptcTag::from_code(self.record, self.tag)
    }

    pub fn name(&self) -> String {
        match self.known_tag() {
            Some(tag) => tag.name().to_string(),
            None => format!("Unknown({}:{})", self.record, self.tag),
        }
    }

    /// Tags not in the table are treated as repeatable so merges never drop them
    pub fn is_repeatable(&self) -> bool {
        self.known_tag().map_or(true, IptcTag::is_repeatable)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(TAG_MARKER)?;
        writer.write_u8(self.record)?;
        writer.write_u8(self.tag)?;
        if self.data.len() < 0x8000 {
            writer.write_u16::<BigEndian>(self.data.len() as u16)?;
        } else {
            // Extended data set: 4-byte length
            writer.write_u16::<BigEndian>(0x8004)?;
            writer.write_u32::<BigEndian>(self.data.len() as u32)?;
        }
        writer.write_all(&self.data)?;
        Ok(())
    }
}

/// Parse a block of data sets
///
/// Parsing stops with a warning at the first byte that is not a tag marker.
pub fn parse(data: &[u8]) -> Result<Vec<IptcDataSet>> {
    let mut cursor = Cursor::new(data);
    let mut sets = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let marker = cursor.read_u8()?;
        if marker != TAG_MARKER {
            // Photoshop pads IPTC blocks with zeros
            if data[cursor.position() as usize - 1..].iter().any(|&b| b != 0) {
                warn!(
                    "Stray bytes after IPTC data at offset {}",
                    cursor.position() - 1
                );
            }
            break;
        }
        let record = cursor.read_u8()?;
        let tag = cursor.read_u8()?;
        let size = cursor.read_u16::<BigEndian>()?;
        let len = if size & 0x8000 != 0 {
            let n = (size & 0x7FFF) as usize;
            if n == 0 || n > 4 {
                return Err(Error::InvalidFormat(format!("IPTC extended size of {} bytes", n)));
            }
            let mut len = 0usize;
            for _ in 0..n {
                len = len << 8 | cursor.read_u8()? as usize;
            }
            len
        } else {
            size as usize
        };

        let remaining = data.len() - cursor.position() as usize;
        if len > remaining {
            return Err(Error::Truncated(format!(
                "IPTC {}:{} needs {} bytes, {} left",
                record, tag, len, remaining
            )));
        }
        let mut value = vec![0u8; len];
        cursor.read_exact(&mut value)?;
        sets.push(IptcDataSet::new(record, tag, value));
    }

    Ok(sets)
}

/// Serialize data sets in the given order
pub fn to_bytes(sets: &[IptcDataSet]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for set in sets {
        set.write(&mut out)?;
    }
    Ok(out)
}

/// Merge `new` over `old`
///
/// Old data sets sharing a (record, tag) with a new non-repeatable data set are
/// dropped; the rest are kept. Duplicates collapse, and the result is sorted by
/// record then tag (stable for repeated values).
pub fn merge(old: &[IptcDataSet], new: &[IptcDataSet]) -> Vec<IptcDataSet> {
    let replaced: HashSet<(u8, u8)> = new
        .iter()
        .filter(|set| !set.is_repeatable())
        .map(|set| (set.record, set.tag))
        .collect();

    let mut seen = HashSet::new();
    let mut merged: Vec<IptcDataSet> = new
        .iter()
        .chain(old.iter().filter(|set| !replaced.contains(&(set.record, set.tag))))
        .filter(|set| seen.insert((*set).clone()))
        .cloned()
        .collect();
    merged.sort_by_key(|set| (set.record, set.tag));
    merged
}
