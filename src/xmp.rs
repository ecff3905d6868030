//! XMP packets and ExtendedXMP
//!
//! A JPEG APP1 segment holds at most 65,504 bytes of XMP. Larger packets are
//! split into a standard packet and an extended part. The standard packet's
//! `rdf:Description` names the extended part by GUID (`xmpNote:HasExtendedXMP`,
//! the MD5 of the extended bytes as 32 hex digits), and each ExtendedXMP
//! segment carries:
//! - identifier `"http://ns.adobe.com/xmp/extension/\0"` (35)
//! - GUID (32 ASCII bytes)
//! - full extended length (4, big-endian)
//! - offset of this chunk (4, big-endian)
//! - chunk bytes

use crate::{
    error::{Error, Result},
    segment::{id, MAX_SEGMENT_PAYLOAD},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use quick_xml::{
    events::{BytesStart, Event},
    name::QName,
    Reader, Writer,
};
use std::io::Cursor;

const RDF_ROOT: &str = "rdf:RDF";
const RDF_DESCRIPTION: &str = "rdf:Description";

/// Attribute naming the extended part
pub const HAS_EXTENDED_XMP: &str = "xmpNote:HasExtendedXMP";
const XMP_NOTE_NS_ATTR: &str = "xmlns:xmpNote";
const XMP_NOTE_NS: &str = "http://ns.adobe.com/xmp/note/";

/// Largest standard packet one APP1 segment can hold
pub const MAX_STANDARD_XMP: usize = MAX_SEGMENT_PAYLOAD - 29;

/// Extended bytes carried per ExtendedXMP segment
pub const EXTENDED_CHUNK_SIZE: usize = MAX_SEGMENT_PAYLOAD - 35 - 32 - 4 - 4;

/// Upper bound on a reassembled extended packet
pub const MAX_EXTENDED_XMP: u32 = 100 * 1024 * 1024;

const GUID_LEN: usize = 32;

/// GUID of an extended XMP part: its MD5 as 32 uppercase hex digits
pub fn guid_of(extended: &[u8]) -> String {
    format!("{:032X}", md5::compute(extended))
}

/// An XMP packet, optionally with an extended part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xmp {
    standard: Vec<u8>,
    extended: Option<Vec<u8>>,
}

impl Xmp {
    pub fn new(standard: impl Into<Vec<u8>>) -> Self {
        Self {
            standard: standard.into(),
            extended: None,
        }
    }

    pub fn with_extended(standard: impl Into<Vec<u8>>, extended: impl Into<Vec<u8>>) -> Self {
        Self {
            standard: standard.into(),
            extended: Some(extended.into()),
        }
    }

    /// Wrap a single packet, moving it into the extended part when it does
    /// not fit one segment
    pub fn from_packet(packet: impl Into<Vec<u8>>) -> Self {
        let packet = packet.into();
        if packet.len() <= MAX_STANDARD_XMP {
            return Self::new(packet);
        }
        let standard = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""/>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;
        Self::with_extended(standard, packet)
    }

    pub fn standard(&self) -> &[u8] {
        &self.standard
    }

    pub fn extended(&self) -> Option<&[u8]> {
        self.extended.as_deref()
    }

    /// The single packet to store where no segment limit applies (TIFF)
    ///
    /// The `rdf:RDF` children of the extended part are appended to those of
    /// the standard packet, and the `xmpNote:HasExtendedXMP` reference is
    /// dropped.
    pub fn merged_packet(&self) -> Result<Vec<u8>> {
        let Some(extended) = self.extended.as_deref() else {
            return Ok(self.standard.clone());
        };
        let standard = remove_description_attribute(&String::from_utf8_lossy(&self.standard), HAS_EXTENDED_XMP)?;
        let children = rdf_children(&String::from_utf8_lossy(extended))?;

        let mut reader = Reader::from_str(&standard);
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::new());
        let mut merged = false;

        loop {
            match reader.read_event()? {
                Event::End(e) if !merged && e.name() == QName(RDF_ROOT.as_bytes()) => {
                    writer.get_mut().extend_from_slice(&children);
                    writer.write_event(Event::End(e))?;
                    merged = true;
                }
                Event::Empty(e) if !merged && e.name() == QName(RDF_ROOT.as_bytes()) => {
                    let end = e.to_end().into_owned();
                    writer.write_event(Event::Start(e))?;
                    writer.get_mut().extend_from_slice(&children);
                    writer.write_event(Event::End(end))?;
                    merged = true;
                }
                Event::Eof => break,
                e => writer.write_event(e)?,
            }
        }

        if !merged {
            warn!("Standard XMP has no rdf:RDF, keeping only the extended part");
            return Ok(extended.to_vec());
        }
        Ok(writer.into_inner())
    }

    pub fn standard_str(&self) -> String {
        String::from_utf8_lossy(&self.standard).into_owned()
    }

    /// GUID of the extended part, if any
    pub fn guid(&self) -> Option<String> {
        self.extended.as_deref().map(guid_of)
    }

    /// GUID the standard packet refers to
    pub fn referenced_guid(&self) -> Option<String> {
        extended_guid(&self.standard)
    }

    /// Standard packet ready for writing, with the GUID reference set when
    /// there is an extended part
    pub fn standard_packet(&self) -> Result<Vec<u8>> {
        let packet = match self.guid() {
            Some(guid) => {
                let xmp = String::from_utf8_lossy(&self.standard);
                let xmp = set_description_attribute(&xmp, HAS_EXTENDED_XMP, &guid)?;
                let xmp = if description_attribute(&xmp, XMP_NOTE_NS_ATTR).is_none() {
                    set_description_attribute(&xmp, XMP_NOTE_NS_ATTR, XMP_NOTE_NS)?
                } else {
                    xmp
                };
                xmp.into_bytes()
            }
            None => self.standard.clone(),
        };
        if packet.len() > MAX_STANDARD_XMP {
            return Err(Error::DataTooLarge {
                size: packet.len(),
                max: MAX_STANDARD_XMP,
            });
        }
        Ok(packet)
    }

    /// APP1 payloads: the standard segment followed by any ExtendedXMP chunks
    pub fn app1_payloads(&self) -> Result<Vec<Vec<u8>>> {
        let standard = self.standard_packet()?;
        let mut payload = Vec::with_capacity(id::XMP.len() + standard.len());
        payload.extend_from_slice(id::XMP);
        payload.extend_from_slice(&standard);

        let mut payloads = vec![payload];
        if let (Some(extended), Some(guid)) = (self.extended.as_deref(), self.guid()) {
            payloads.extend(chunk_extended(extended, &guid)?);
        }
        Ok(payloads)
    }
}

/// Split an extended part into ExtendedXMP APP1 payloads
pub fn chunk_extended(extended: &[u8], guid: &str) -> Result<Vec<Vec<u8>>> {
    if guid.len() != GUID_LEN {
        return Err(Error::InvalidFormat(format!("XMP GUID must be {} bytes", GUID_LEN)));
    }
    if extended.len() > MAX_EXTENDED_XMP as usize {
        return Err(Error::DataTooLarge {
            size: extended.len(),
            max: MAX_EXTENDED_XMP as usize,
        });
    }

    let total = extended.len() as u32;
    let mut payloads = Vec::new();
    for (index, chunk) in extended.chunks(EXTENDED_CHUNK_SIZE).enumerate() {
        let mut payload = Vec::with_capacity(id::XMP_EXTENSION.len() + GUID_LEN + 8 + chunk.len());
        payload.extend_from_slice(id::XMP_EXTENSION);
        payload.extend_from_slice(guid.as_bytes());
        payload.write_u32::<BigEndian>(total)?;
        payload.write_u32::<BigEndian>((index * EXTENDED_CHUNK_SIZE) as u32)?;
        payload.extend_from_slice(chunk);
        payloads.push(payload);
    }
    Ok(payloads)
}

/// Reassembles the extended part belonging to one GUID
///
/// Chunks carrying any other GUID are discarded.
#[derive(Debug)]
pub struct ExtendedXmpAssembler {
    guid: String,
    buffer: Option<Vec<u8>>,
    received: usize,
}

impl ExtendedXmpAssembler {
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            buffer: None,
            received: 0,
        }
    }

    /// Offer an APP1 payload; returns whether it was accepted
    pub fn push(&mut self, payload: &[u8]) -> Result<bool> {
        let Some(body) = payload.strip_prefix(id::XMP_EXTENSION) else {
            return Ok(false);
        };
        if body.len() < GUID_LEN + 8 {
            warn!("ExtendedXMP segment too short ({} bytes)", body.len());
            return Ok(false);
        }
        if &body[..GUID_LEN] != self.guid.as_bytes() {
            debug!(
                "Skipping ExtendedXMP chunk for GUID {}",
                String::from_utf8_lossy(&body[..GUID_LEN])
            );
            return Ok(false);
        }

        let mut cursor = Cursor::new(&body[GUID_LEN..GUID_LEN + 8]);
        let total = cursor.read_u32::<BigEndian>()?;
        let offset = cursor.read_u32::<BigEndian>()? as usize;
        let chunk = &body[GUID_LEN + 8..];

        if total > MAX_EXTENDED_XMP {
            return Err(Error::DataTooLarge {
                size: total as usize,
                max: MAX_EXTENDED_XMP as usize,
            });
        }
        let buffer = self.buffer.get_or_insert_with(|| vec![0u8; total as usize]);
        if buffer.len() != total as usize || offset + chunk.len() > buffer.len() {
            warn!(
                "ExtendedXMP chunk at {} (+{}) does not fit declared length {}",
                offset,
                chunk.len(),
                total
            );
            return Ok(false);
        }
        buffer[offset..offset + chunk.len()].copy_from_slice(chunk);
        self.received += chunk.len();
        Ok(true)
    }

    /// The reassembled extended part, if any chunk was accepted
    pub fn finish(self) -> Option<Vec<u8>> {
        let buffer = self.buffer?;
        if self.received < buffer.len() {
            warn!(
                "ExtendedXMP incomplete: {} of {} bytes",
                self.received,
                buffer.len()
            );
        }
        Some(buffer)
    }
}

/// GUID referenced by a standard packet's `xmpNote:HasExtendedXMP`
pub fn extended_guid(standard: &[u8]) -> Option<String> {
    let xmp = String::from_utf8_lossy(standard);
    description_attribute(&xmp, HAS_EXTENDED_XMP)
        .map(|guid| guid.trim().to_string())
        .filter(|guid| guid.len() == GUID_LEN)
}

/// Read a property from the first `rdf:Description`
///
/// The property may be an attribute of `rdf:Description` or a child element.
pub fn description_attribute(xmp: &str, key: &str) -> Option<String> {
    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(true);
    let mut in_property = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name() == QName(RDF_DESCRIPTION.as_bytes()) {
                    for attr in e.attributes().flatten() {
                        if attr.key == QName(key.as_bytes()) {
                            return Some(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                } else {
                    in_property = e.name() == QName(key.as_bytes());
                }
            }
            Ok(Event::Text(ref text)) if in_property => {
                return Some(String::from_utf8_lossy(text).into_owned());
            }
            Ok(Event::End(_)) => in_property = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Add or replace an attribute on the first `rdf:Description`
pub fn set_description_attribute(xmp: &str, key: &str, value: &str) -> Result<String> {
    rewrite_description(xmp, key, Some(value))
}

/// Remove an attribute from every `rdf:Description`
pub fn remove_description_attribute(xmp: &str, key: &str) -> Result<String> {
    rewrite_description(xmp, key, None)
}

fn rewrite_description(xmp: &str, key: &str, value: Option<&str>) -> Result<String> {
    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = false;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut found = false;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) if e.name() == QName(RDF_DESCRIPTION.as_bytes()) && !(found && value.is_some()) => {
                writer.write_event(Event::Start(rebuild_description(e, key, value)?))?;
                found = true;
            }
            Event::Empty(ref e) if e.name() == QName(RDF_DESCRIPTION.as_bytes()) && !(found && value.is_some()) => {
                writer.write_event(Event::Empty(rebuild_description(e, key, value)?))?;
                found = true;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    if !found && value.is_some() {
        return Err(Error::InvalidFormat("XMP packet has no rdf:Description".into()));
    }
    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| Error::InvalidFormat(e.to_string()))
}

/// Everything between `<rdf:RDF>` and `</rdf:RDF>`, serialized
fn rdf_children(xmp: &str) -> Result<Vec<u8>> {
    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());
    // Nesting depth below rdf:RDF; zero when outside it
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) if depth == 0 => {
                if e.name() == QName(RDF_ROOT.as_bytes()) {
                    depth = 1;
                }
            }
            Event::Start(_) => {
                depth += 1;
                writer.write_event(event)?;
            }
            Event::End(_) if depth == 1 => depth = 0,
            Event::End(_) if depth > 1 => {
                depth -= 1;
                writer.write_event(event)?;
            }
            Event::Eof => break,
            _ if depth > 0 => writer.write_event(event)?,
            _ => {}
        }
    }
    Ok(writer.into_inner())
}

/// Copy of `e` with `key` dropped and, if given, re-added with `value`
fn rebuild_description(e: &BytesStart, key: &str, value: Option<&str>) -> Result<BytesStart<'static>> {
    let mut elem = BytesStart::new(RDF_DESCRIPTION);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key != QName(key.as_bytes()) {
            elem.push_attribute(attr);
        }
    }
    if let Some(value) = value {
        elem.push_attribute((key, value));
    }
    Ok(elem)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_XMP: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
    <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
        <rdf:Description rdf:about=""
            xmlns:dc="http://purl.org/dc/elements/1.1/"
            dc:format="image/jpeg">
        </rdf:Description>
    </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn test_description_attribute() {
        assert_eq!(description_attribute(TEST_XMP, "dc:format").as_deref(), Some("image/jpeg"));
        assert_eq!(description_attribute(TEST_XMP, "dc:title"), None);

        let element_form = r#"<rdf:Description><xmpNote:HasExtendedXMP>ABC</xmpNote:HasExtendedXMP></rdf:Description>"#;
        assert_eq!(
            description_attribute(element_form, HAS_EXTENDED_XMP).as_deref(),
            Some("ABC")
        );
    }

    #[test]
    fn test_set_and_remove_attribute() {
        let updated = set_description_attribute(TEST_XMP, "dc:format", "image/tiff").unwrap();
        assert_eq!(description_attribute(&updated, "dc:format").as_deref(), Some("image/tiff"));
        assert!(updated.contains("rdf:about"));

        let removed = remove_description_attribute(&updated, "dc:format").unwrap();
        assert_eq!(description_attribute(&removed, "dc:format"), None);

        assert!(set_description_attribute("<x/>", "a:b", "c").is_err());
    }

    #[test]
    fn test_guid_reference() {
        let extended = vec![b'x'; 100_000];
        let xmp = Xmp::with_extended(TEST_XMP, extended.clone());
        let guid = xmp.guid().unwrap();
        assert_eq!(guid.len(), 32);
        assert_eq!(guid, guid_of(&extended));

        let standard = xmp.standard_packet().unwrap();
        assert_eq!(extended_guid(&standard), Some(guid));
        assert!(String::from_utf8(standard).unwrap().contains(XMP_NOTE_NS));
    }

    #[test]
    fn test_chunking_and_reassembly() {
        let extended: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8).collect();
        let guid = guid_of(&extended);
        let chunks = chunk_extended(&extended, &guid).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 35 + 32 + 8 + EXTENDED_CHUNK_SIZE);
        assert!(chunks.iter().all(|c| c.len() <= MAX_SEGMENT_PAYLOAD));

        // Reverse order still lands every chunk at its offset
        let mut assembler = ExtendedXmpAssembler::new(guid.clone());
        for chunk in chunks.iter().rev() {
            assert!(assembler.push(chunk).unwrap());
        }
        assert_eq!(assembler.finish().unwrap(), extended);
    }

    #[test]
    fn test_foreign_guid_discarded() {
        let ours = vec![b'a'; 70_000];
        let theirs = vec![b'b'; 70_000];
        let our_guid = guid_of(&ours);
        let their_guid = guid_of(&theirs);

        let mut assembler = ExtendedXmpAssembler::new(our_guid.clone());
        let ours_chunks = chunk_extended(&ours, &our_guid).unwrap();
        let theirs_chunks = chunk_extended(&theirs, &their_guid).unwrap();
        for (a, b) in ours_chunks.iter().zip(theirs_chunks.iter()) {
            assert!(!assembler.push(b).unwrap());
            assert!(assembler.push(a).unwrap());
        }
        assert_eq!(assembler.finish().unwrap(), ours);
    }

    #[test]
    fn test_from_packet_splits_large_xmp() {
        let small = Xmp::from_packet(TEST_XMP);
        assert!(small.extended().is_none());

        let big = format!("{}{}", TEST_XMP, " ".repeat(MAX_STANDARD_XMP));
        let xmp = Xmp::from_packet(big.clone());
        assert_eq!(xmp.extended(), Some(big.as_bytes()));
        let payloads = xmp.app1_payloads().unwrap();
        assert!(payloads[0].starts_with(id::XMP));
        assert!(payloads[1..].iter().all(|p| p.starts_with(id::XMP_EXTENSION)));
    }

    #[test]
    fn test_merged_packet() {
        let standard = set_description_attribute(TEST_XMP, HAS_EXTENDED_XMP, &"0".repeat(GUID_LEN)).unwrap();
        let extended = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"><photoshop:History>edited</photoshop:History></rdf:Description></rdf:RDF></x:xmpmeta>"#;

        let merged = Xmp::with_extended(standard, extended).merged_packet().unwrap();
        let merged = String::from_utf8(merged).unwrap();
        assert_eq!(description_attribute(&merged, "dc:format").as_deref(), Some("image/jpeg"));
        assert_eq!(description_attribute(&merged, "photoshop:History").as_deref(), Some("edited"));
        assert_eq!(description_attribute(&merged, HAS_EXTENDED_XMP), None);
        assert_eq!(merged.matches("<rdf:RDF").count(), 1);
        assert_eq!(merged.matches("</rdf:RDF>").count(), 1);

        // Empty rdf:RDF in the standard packet still receives the children
        let bare = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"/></x:xmpmeta>"#;
        let merged = Xmp::with_extended(bare, extended).merged_packet().unwrap();
        let merged = String::from_utf8(merged).unwrap();
        assert_eq!(description_attribute(&merged, "photoshop:History").as_deref(), Some("edited"));

        assert_eq!(Xmp::new(TEST_XMP).merged_packet().unwrap(), TEST_XMP.as_bytes());
    }
}
