//! Image File Directories
//!
//! An IFD is a sorted list of 12-byte entries followed by a 4-byte pointer to
//! the next directory. Some entries point at child directories (EXIF, GPS,
//! Interoperability, SubIFDs); those are read recursively and written after
//! their parent, with the parent's pointer entry patched once the child's
//! final position is known.

use super::{
    field::{FieldType, FieldValue, TiffField},
    tag::{describe_tag, ExifTag, GpsTag, InteropTag, Namespace, TagSet, TiffTag},
};
use crate::{
    error::{Error, Result},
    io::ByteOrder,
    segment::MAX_SEGMENT_SIZE,
};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};

/// Maximum number of tags in an IFD (prevents DOS attacks)
pub const MAX_IFD_TAGS: u16 = 1000;

/// One directory of a TIFF-family stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ifd {
    namespace: Namespace,
    fields: BTreeMap<u16, TiffField>,
    children: BTreeMap<u16, Vec<Ifd>>,
    start_offset: Option<u32>,
}

impl Ifd {
    /// Create an empty baseline TIFF directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty directory in the given namespace
    pub fn with_namespace(namespace: Namespace) -> Self {
        Self {
            namespace,
            ..Self::default()
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Offset this directory was last read from or written to
    pub fn start_offset(&self) -> Option<u32> {
        self.start_offset
    }

    /// Add or replace a field
    pub fn add_field(&mut self, tag: u16, value: FieldValue) -> Option<TiffField> {
        self.fields.insert(tag, TiffField::new(tag, value))
    }

    /// Add or replace a baseline TIFF field
    pub fn add_tiff_field(&mut self, tag: TiffTag, value: FieldValue) -> Option<TiffField> {
        self.add_field(tag.code(), value)
    }

    pub fn insert_field(&mut self, field: TiffField) -> Option<TiffField> {
        self.fields.insert(field.tag(), field)
    }

    pub fn field(&self, tag: u16) -> Option<&TiffField> {
        self.fields.get(&tag)
    }

    pub fn field_mut(&mut self, tag: u16) -> Option<&mut TiffField> {
        self.fields.get_mut(&tag)
    }

    /// Value of a field, if present
    pub fn value(&self, tag: u16) -> Option<&FieldValue> {
        self.fields.get(&tag).map(TiffField::value)
    }

    pub fn remove_field(&mut self, tag: u16) -> Option<TiffField> {
        self.fields.remove(&tag)
    }

    pub fn has_field(&self, tag: u16) -> bool {
        self.fields.contains_key(&tag)
    }

    /// Fields in ascending tag order
    pub fn fields(&self) -> impl Iterator<Item = &TiffField> {
        self.fields.values()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Attach a child directory under a pointer tag, replacing any previous one
    ///
    /// The pointer field itself is (re)created when the directory is written.
    pub fn add_child(&mut self, tag: u16, child: Ifd) {
        self.children.insert(tag, vec![child]);
        self.fields
            .entry(tag)
            .or_insert_with(|| TiffField::new(tag, FieldValue::long(0)));
    }

    /// First child directory under a pointer tag
    pub fn child(&self, tag: u16) -> Option<&Ifd> {
        self.children.get(&tag).and_then(|kids| kids.first())
    }

    pub fn child_mut(&mut self, tag: u16) -> Option<&mut Ifd> {
        self.children.get_mut(&tag).and_then(|kids| kids.first_mut())
    }

    /// All child directories under a pointer tag
    pub fn children(&self, tag: u16) -> &[Ifd] {
        self.children.get(&tag).map_or(&[], |kids| kids.as_slice())
    }

    pub fn children_mut(&mut self, tag: u16) -> &mut [Ifd] {
        self.children.get_mut(&tag).map_or(&mut [], |kids| kids.as_mut_slice())
    }

    /// Pointer tags that own children
    pub fn child_tags(&self) -> impl Iterator<Item = u16> + '_ {
        self.children.keys().copied()
    }

    /// Remove the children under `tag` together with their pointer field
    pub fn remove_child(&mut self, tag: u16) -> Option<Vec<Ifd>> {
        self.fields.remove(&tag);
        self.children.remove(&tag)
    }

    /// Write this directory (and then its children) at `offset`
    ///
    /// Returns the stream position just past everything written. The offset is
    /// bumped to the next word boundary if needed.
    pub fn write<W: Write + Seek>(&mut self, writer: &mut W, order: ByteOrder, offset: u32) -> Result<u32> {
        let mut offset = offset;
        writer.seek(SeekFrom::Start(offset as u64))?;
        if offset % 2 == 1 {
            writer.write_all(&[0])?;
            offset += 1;
        }

        // One placeholder per child; patched after the children are written
        for (&tag, kids) in &self.children {
            let placeholder = vec![0u32; kids.len()];
            let value = match self.fields.get(&tag).map(TiffField::value) {
                Some(FieldValue::Ifd(_)) => FieldValue::Ifd(placeholder),
                _ => FieldValue::Long(placeholder),
            };
            self.fields.insert(tag, TiffField::new(tag, value));
        }

        let count = self.fields.len();
        if count > MAX_IFD_TAGS as usize {
            return Err(Error::InvalidFormat(format!("IFD has {} fields", count)));
        }
        self.start_offset = Some(offset);

        let entries_end = offset as u64 + 2 + 12 * count as u64 + 4;
        let mut overflow: Vec<u8> = Vec::new();

        order.write_u16(writer, count as u16)?;
        for (index, field) in self.fields.values_mut().enumerate() {
            let entry_pos = offset + 2 + 12 * index as u32;
            let value = field.value();
            let mut bytes = value.encode(order)?;

            order.write_u16(writer, field.tag())?;
            order.write_u16(writer, value.type_code())?;
            order.write_u32(writer, value.count())?;

            if bytes.len() <= 4 {
                bytes.resize(4, 0);
                writer.write_all(&bytes)?;
                field.set_data_offset(entry_pos + 8);
            } else {
                let data_offset = to_offset(entries_end + overflow.len() as u64)?;
                order.write_u32(writer, data_offset)?;
                field.set_data_offset(data_offset);
                overflow.extend_from_slice(&bytes);
                // Values start on a word boundary
                if overflow.len() % 2 == 1 {
                    overflow.push(0);
                }
            }
        }
        order.write_u32(writer, 0)?;
        writer.write_all(&overflow)?;

        let mut end = to_offset(entries_end + overflow.len() as u64)?;
        debug!(
            "Wrote {:?} IFD at {} with {} fields, {} overflow bytes",
            self.namespace,
            offset,
            count,
            overflow.len()
        );

        for (&tag, kids) in self.children.iter_mut() {
            let mut starts = Vec::with_capacity(kids.len());
            for kid in kids.iter_mut() {
                end = kid.write(writer, order, end)?;
                starts.push(kid.start_offset.unwrap_or(0));
            }
            if let Some(field) = self.fields.get_mut(&tag) {
                if let Some(pointer) = field.data_offset() {
                    writer.seek(SeekFrom::Start(pointer as u64))?;
                    for &start in &starts {
                        order.write_u32(writer, start)?;
                    }
                }
                match field.value_mut() {
                    FieldValue::Ifd(v) | FieldValue::Long(v) => *v = starts,
                    _ => {}
                }
            }
        }

        writer.seek(SeekFrom::Start(end as u64))?;
        Ok(end)
    }

    /// Patch the "next IFD" pointer of an already written directory
    pub fn set_next_ifd_offset<W: Write + Seek>(&self, writer: &mut W, order: ByteOrder, next: u32) -> Result<()> {
        let start = self
            .start_offset
            .ok_or_else(|| Error::InvalidFormat("IFD has not been written yet".into()))?;
        let pointer = start as u64 + 2 + 12 * self.fields.len() as u64;
        let current = writer.stream_position()?;
        writer.seek(SeekFrom::Start(pointer))?;
        order.write_u32(writer, next)?;
        writer.seek(SeekFrom::Start(current))?;
        Ok(())
    }
}

fn to_offset(position: u64) -> Result<u32> {
    u32::try_from(position).map_err(|_| Error::DataTooLarge {
        size: position as usize,
        max: u32::MAX as usize,
    })
}

/// Read the chain of top-level directories starting at `first_offset`
///
/// A malformed directory after the first one ends the chain with a warning.
pub fn read_ifds<R: Read + Seek>(reader: &mut R, order: ByteOrder, first_offset: u32) -> Result<Vec<Ifd>> {
    let mut visited = HashSet::new();
    let mut pages = Vec::new();
    let mut offset = first_offset;

    while offset != 0 {
        if !visited.insert(offset) {
            warn!("IFD chain loops back to offset {}, stopping", offset);
            break;
        }
        match read_ifd::<TiffTag, R>(reader, order, offset, &mut visited) {
            Ok((ifd, next)) => {
                pages.push(ifd);
                offset = next;
            }
            Err(e) if !pages.is_empty() => {
                warn!("Ignoring malformed IFD at offset {}: {}", offset, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    debug!("Read {} top-level IFDs", pages.len());
    Ok(pages)
}

/// Read one directory in namespace `T`, returning it and the next-IFD pointer
pub fn read_ifd<T: TagSet, R: Read + Seek>(
    reader: &mut R,
    order: ByteOrder,
    offset: u32,
    visited: &mut HashSet<u32>,
) -> Result<(Ifd, u32)> {
    reader.seek(SeekFrom::Start(offset as u64))?;
    let count = order.read_u16(reader)?;
    if count > MAX_IFD_TAGS {
        return Err(Error::InvalidFormat(format!(
            "IFD at {} claims {} entries (max {})",
            offset, count, MAX_IFD_TAGS
        )));
    }

    let mut ifd = Ifd::with_namespace(T::NAMESPACE);
    ifd.start_offset = Some(offset);

    for index in 0..count as u64 {
        let entry_pos = offset as u64 + 2 + 12 * index;
        reader.seek(SeekFrom::Start(entry_pos))?;
        let field = read_entry::<T, R>(reader, order, entry_pos)?;
        ifd.fields.insert(field.tag(), field);
    }

    reader.seek(SeekFrom::Start(offset as u64 + 2 + 12 * count as u64))?;
    let next = order.read_u32(reader)?;

    let pointers: Vec<(u16, Namespace, Vec<u32>)> = ifd
        .fields
        .values()
        .filter_map(|field| {
            let namespace = T::NAMESPACE.child_namespace(field.tag()).or_else(|| {
                (T::NAMESPACE == Namespace::Tiff && field.value().field_type() == Some(FieldType::Ifd))
                    .then_some(Namespace::Tiff)
            })?;
            let offsets = field.value().as_u32s()?;
            Some((field.tag(), namespace, offsets))
        })
        .collect();

    for (tag, namespace, offsets) in pointers {
        let mut kids = Vec::new();
        let mut failed = false;
        for child_offset in offsets.into_iter().filter(|&o| o != 0) {
            if !visited.insert(child_offset) {
                warn!("Child IFD at {} already visited, skipping", child_offset);
                continue;
            }
            let result = match namespace {
                Namespace::Exif => read_ifd::<ExifTag, R>(reader, order, child_offset, visited),
                Namespace::Gps => read_ifd::<GpsTag, R>(reader, order, child_offset, visited),
                Namespace::Interop => read_ifd::<InteropTag, R>(reader, order, child_offset, visited),
                Namespace::Tiff => read_ifd::<TiffTag, R>(reader, order, child_offset, visited),
            };
            match result {
                Ok((kid, _)) => kids.push(kid),
                Err(e) => {
                    warn!(
                        "Dropping {} child IFD at {}: {}",
                        describe_tag(T::NAMESPACE, tag),
                        child_offset,
                        e
                    );
                    failed = true;
                    break;
                }
            }
        }
        if failed || kids.is_empty() {
            ifd.fields.remove(&tag);
        } else {
            ifd.children.insert(tag, kids);
        }
    }

    debug!(
        "Read {:?} IFD at {} with {} fields, next {}",
        T::NAMESPACE,
        offset,
        ifd.fields.len(),
        next
    );
    Ok((ifd, next))
}

/// Read one 12-byte directory entry positioned at `entry_pos`
fn read_entry<T: TagSet, R: Read + Seek>(reader: &mut R, order: ByteOrder, entry_pos: u64) -> Result<TiffField> {
    let tag = order.read_u16(reader)?;
    let type_code = order.read_u16(reader)?;
    let count = order.read_u32(reader)?;
    let mut slot = [0u8; 4];
    reader.read_exact(&mut slot)?;

    let Some(field_type) = FieldType::from_code(type_code) else {
        warn!(
            "Keeping {} with unknown field type {} as opaque bytes",
            describe_tag(T::NAMESPACE, tag),
            type_code
        );
        let mut field = TiffField::new(
            tag,
            FieldValue::Unknown {
                type_code,
                count,
                raw: slot,
            },
        );
        field.set_data_offset((entry_pos + 8) as u32);
        return Ok(field);
    };

    let len = count as u64 * field_type.element_size() as u64;
    if len > MAX_SEGMENT_SIZE {
        return Err(Error::DataTooLarge {
            size: len as usize,
            max: MAX_SEGMENT_SIZE as usize,
        });
    }

    let (bytes, data_offset) = if len <= 4 {
        (slot[..len as usize].to_vec(), (entry_pos + 8) as u32)
    } else {
        let value_offset = order.read_u32(&mut &slot[..])?;
        reader.seek(SeekFrom::Start(value_offset as u64))?;
        let mut bytes = Vec::new();
        reader.by_ref().take(len).read_to_end(&mut bytes)?;
        if (bytes.len() as u64) < len {
            return Err(Error::Truncated(format!(
                "{} value at {} ({} of {} bytes)",
                describe_tag(T::NAMESPACE, tag),
                value_offset,
                bytes.len(),
                len
            )));
        }
        (bytes, value_offset)
    };

    let value = FieldValue::decode(field_type, count, &bytes, order)?;
    let mut field = TiffField::new(tag, value);
    field.set_data_offset(data_offset);
    Ok(field)
}
