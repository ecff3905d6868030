//! Metadata registry returned by reads
//!
//! Each entry keeps the raw bytes found in the container and parses them only
//! when a structured view is first asked for.

use crate::{
    appn::{Adobe, Ducky, Jfif},
    error::Result,
    exif::Exif,
    icc::IccProfile,
    iptc::{self, IptcDataSet},
    irb::{resource_name, Irb},
    thumbnail::Thumbnail,
    tiff::{describe_tag, Ifd},
    xmp::Xmp,
};
use log::{debug, warn};
use std::{collections::BTreeMap, fmt};

/// Kinds of metadata a container can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataKind {
    Exif,
    Iptc,
    IccProfile,
    Xmp,
    PhotoshopIrb,
    Comment,
    Jfif,
    Ducky,
    Adobe,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 9] = [
        MetadataKind::Exif,
        MetadataKind::Iptc,
        MetadataKind::IccProfile,
        MetadataKind::Xmp,
        MetadataKind::PhotoshopIrb,
        MetadataKind::Comment,
        MetadataKind::Jfif,
        MetadataKind::Ducky,
        MetadataKind::Adobe,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetadataKind::Exif => "EXIF",
            MetadataKind::Iptc => "IPTC",
            MetadataKind::IccProfile => "ICC_PROFILE",
            MetadataKind::Xmp => "XMP",
            MetadataKind::PhotoshopIrb => "PHOTOSHOP_IRB",
            MetadataKind::Comment => "COMMENT",
            MetadataKind::Jfif => "JFIF",
            MetadataKind::Ducky => "DUCKY",
            MetadataKind::Adobe => "ADOBE",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured view of one metadata block
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Exif(Exif),
    Iptc(Vec<IptcDataSet>),
    IccProfile(IccProfile),
    Xmp(Xmp),
    PhotoshopIrb(Irb),
    Comments(Vec<String>),
    Jfif(Jfif),
    Ducky(Ducky),
    Adobe(Adobe),
}

impl StructuredValue {
    /// Parse the raw bytes of `kind`
    pub fn parse(kind: MetadataKind, raw: &[u8]) -> Result<Self> {
        Ok(match kind {
            MetadataKind::Exif => StructuredValue::Exif(Exif::parse(raw)?),
            MetadataKind::Iptc => StructuredValue::Iptc(iptc::parse(raw)?),
            MetadataKind::IccProfile => StructuredValue::IccProfile(IccProfile::parse(raw)?),
            MetadataKind::Xmp => StructuredValue::Xmp(Xmp::new(raw)),
            MetadataKind::PhotoshopIrb => StructuredValue::PhotoshopIrb(Irb::parse(raw)?),
            MetadataKind::Comment => StructuredValue::Comments(split_comments(raw)),
            MetadataKind::Jfif => StructuredValue::Jfif(Jfif::parse(raw)?),
            MetadataKind::Ducky => StructuredValue::Ducky(Ducky::parse(raw)?),
            MetadataKind::Adobe => StructuredValue::Adobe(Adobe::parse(raw)?),
        })
    }
}

/// Comments are stored NUL-separated
fn split_comments(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|text| !text.is_empty())
        .map(|text| String::from_utf8_lossy(text).into_owned())
        .collect()
}

/// Join comments the way they are stored in a registry entry
pub fn join_comments(comments: &[String]) -> Vec<u8> {
    comments.join("\0").into_bytes()
}

#[derive(Debug, Clone, PartialEq)]
enum LazyValue {
    Unparsed,
    Parsed(Box<StructuredValue>),
}

/// One metadata block: raw bytes plus a lazily parsed view
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    kind: MetadataKind,
    raw: Vec<u8>,
    state: LazyValue,
}

impl Metadata {
    pub fn new(kind: MetadataKind, raw: Vec<u8>) -> Self {
        Self {
            kind,
            raw,
            state: LazyValue::Unparsed,
        }
    }

    /// Entry whose structured value is already known
    pub fn with_value(kind: MetadataKind, raw: Vec<u8>, value: StructuredValue) -> Self {
        Self {
            kind,
            raw,
            state: LazyValue::Parsed(Box::new(value)),
        }
    }

    pub fn kind(&self) -> MetadataKind {
        self.kind
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self.state, LazyValue::Parsed(_))
    }

    /// Parsed value, if parsing already happened
    pub fn value(&self) -> Option<&StructuredValue> {
        match &self.state {
            LazyValue::Parsed(value) => Some(value),
            LazyValue::Unparsed => None,
        }
    }

    /// Parse the raw bytes on first use
    ///
    /// A failed parse leaves the entry unparsed.
    pub fn ensure_parsed(&mut self) -> Result<&StructuredValue> {
        if let LazyValue::Unparsed = self.state {
            let value = StructuredValue::parse(self.kind, &self.raw)?;
            debug!("Parsed {} ({} bytes)", self.kind, self.raw.len());
            self.state = LazyValue::Parsed(Box::new(value));
        }
        match &self.state {
            LazyValue::Parsed(value) => Ok(value),
            LazyValue::Unparsed => unreachable!("metadata state set above"),
        }
    }

    pub fn into_value(self) -> Result<StructuredValue> {
        match self.state {
            LazyValue::Parsed(value) => Ok(*value),
            LazyValue::Unparsed => StructuredValue::parse(self.kind, &self.raw),
        }
    }

    /// Thumbnail carried by this block, if any
    pub fn thumbnail(&mut self) -> Result<Option<Thumbnail>> {
        Ok(match self.ensure_parsed()? {
            StructuredValue::Exif(exif) => exif.thumbnail().cloned(),
            StructuredValue::PhotoshopIrb(irb) => match irb.thumbnail_resource()? {
                Some(resource) => Some(resource.thumbnail()?),
                None => None,
            },
            StructuredValue::Jfif(jfif) => jfif.thumbnail(),
            _ => None,
        })
    }

    /// Display tree of the parsed value
    pub fn entries(&mut self) -> Result<Vec<MetadataEntry>> {
        let entries = match self.ensure_parsed()? {
            StructuredValue::Exif(exif) => exif_entries(exif),
            StructuredValue::Iptc(sets) => sets
                .iter()
                .map(|set| MetadataEntry::new(set.name(), set.data_as_string()))
                .collect(),
            StructuredValue::IccProfile(icc) => icc_entries(icc),
            StructuredValue::Xmp(xmp) => {
                let mut entries = vec![MetadataEntry::new("XMP", xmp.standard_str())];
                if let Some(extended) = xmp.extended() {
                    entries.push(MetadataEntry::new(
                        "ExtendedXMP",
                        format!("{} bytes, GUID {}", extended.len(), xmp.guid().unwrap_or_default()),
                    ));
                }
                entries
            }
            StructuredValue::PhotoshopIrb(irb) => irb_entries(irb),
            StructuredValue::Comments(comments) => comments
                .iter()
                .map(|comment| MetadataEntry::new("Comment", comment.clone()))
                .collect(),
            StructuredValue::Jfif(jfif) => {
                let (width, height) = jfif.thumbnail_size();
                vec![
                    MetadataEntry::new("Version", format!("{}.{:02}", jfif.major_version, jfif.minor_version)),
                    MetadataEntry::new("Density unit", jfif.density_unit_name()),
                    MetadataEntry::new("X density", jfif.x_density.to_string()),
                    MetadataEntry::new("Y density", jfif.y_density.to_string()),
                    MetadataEntry::new("Thumbnail", format!("{}x{}", width, height)),
                ]
            }
            StructuredValue::Ducky(ducky) => ducky
                .records()
                .iter()
                .map(|record| MetadataEntry::new(record.name(), record.value_string()))
                .collect(),
            StructuredValue::Adobe(adobe) => vec![
                MetadataEntry::new("DCTEncodeVersion", adobe.dct_encode_version.to_string()),
                MetadataEntry::new("Flags0", format!("0x{:04X}", adobe.flags0)),
                MetadataEntry::new("Flags1", format!("0x{:04X}", adobe.flags1)),
                MetadataEntry::new("ColorTransform", adobe.color_transform_name()),
            ],
        };
        Ok(entries)
    }
}

fn ifd_entry(title: String, ifd: &Ifd) -> MetadataEntry {
    let namespace = ifd.namespace();
    let mut children: Vec<MetadataEntry> = ifd
        .fields()
        .filter(|field| ifd.children(field.tag()).is_empty())
        .map(|field| MetadataEntry::new(describe_tag(namespace, field.tag()), field.value().to_string()))
        .collect();
    for tag in ifd.child_tags() {
        for child in ifd.children(tag) {
            children.push(ifd_entry(describe_tag(namespace, tag), child));
        }
    }
    MetadataEntry::new(title, format!("{} fields", ifd.field_count())).with_children(children)
}

fn exif_entries(exif: &Exif) -> Vec<MetadataEntry> {
    let mut entries = vec![ifd_entry("IFD0".into(), exif.image_ifd())];
    if let Some(thumbnail) = exif.thumbnail() {
        let mut ifd1 = match exif.thumbnail_ifd() {
            Some(ifd) => ifd_entry("IFD1".into(), ifd),
            None => MetadataEntry::new("IFD1", ""),
        };
        ifd1.children.push(MetadataEntry::new(
            "Thumbnail",
            format!("{} {}x{}", thumbnail.format_name(), thumbnail.width(), thumbnail.height()),
        ));
        entries.push(ifd1);
    }
    entries
}

fn icc_entries(icc: &IccProfile) -> Vec<MetadataEntry> {
    let [year, month, day, hour, minute, second] = icc.created;
    vec![
        MetadataEntry::new("ProfileSize", icc.size.to_string()),
        MetadataEntry::new("CMMType", icc.cmm_type.clone()),
        MetadataEntry::new(
            "Version",
            format!("{}.{}.{}", icc.version.0, icc.version.1, icc.version.2),
        ),
        MetadataEntry::new(
            "ProfileClass",
            format!("{} ({})", icc.profile_class, icc.profile_class_name()),
        ),
        MetadataEntry::new("ColorSpace", icc.color_space.clone()),
        MetadataEntry::new("ConnectionSpace", icc.connection_space.clone()),
        MetadataEntry::new(
            "Created",
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        ),
        MetadataEntry::new("Platform", icc.platform.clone()),
        MetadataEntry::new("Manufacturer", icc.manufacturer.clone()),
        MetadataEntry::new("Model", icc.model.clone()),
        MetadataEntry::new("RenderingIntent", icc.rendering_intent_name()),
        MetadataEntry::new("Creator", icc.creator.clone()),
        MetadataEntry::new("TagCount", icc.tag_count.to_string()),
    ]
}

fn irb_entries(irb: &Irb) -> Vec<MetadataEntry> {
    irb.iter()
        .map(|resource| {
            let mut entry = MetadataEntry::new(
                format!("0x{:04X} {}", resource.id(), resource_name(resource.id())),
                format!("{} bytes", resource.size()),
            );
            let nested = match resource.id() {
                crate::irb::resource_id::IPTC_NAA => iptc::parse(resource.data()).map(|sets| {
                    sets.iter()
                        .map(|set| MetadataEntry::new(set.name(), set.data_as_string()))
                        .collect()
                }),
                _ => Ok(Vec::new()),
            };
            match nested {
                Ok(children) => entry.children = children,
                Err(e) => warn!("Unreadable IPTC inside IRB: {}", e),
            }
            entry
        })
        .collect()
}

/// One line of a metadata display tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
    pub children: Vec<MetadataEntry>,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<MetadataEntry>) -> Self {
        self.children = children;
        self
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}: {}", "", self.key, self.value, indent = depth * 2)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Metadata found by one read, keyed by kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRegistry {
    entries: BTreeMap<MetadataKind, Metadata>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous one of the same kind
    pub fn insert(&mut self, metadata: Metadata) -> Option<Metadata> {
        self.entries.insert(metadata.kind(), metadata)
    }

    pub fn get(&self, kind: MetadataKind) -> Option<&Metadata> {
        self.entries.get(&kind)
    }

    pub fn get_mut(&mut self, kind: MetadataKind) -> Option<&mut Metadata> {
        self.entries.get_mut(&kind)
    }

    pub fn remove(&mut self, kind: MetadataKind) -> Option<Metadata> {
        self.entries.remove(&kind)
    }

    pub fn contains(&self, kind: MetadataKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metadata> {
        self.entries.values()
    }

    pub fn kinds(&self) -> impl Iterator<Item = MetadataKind> + '_ {
        self.entries.keys().copied()
    }

    /// Parsed value of `kind`, parsing it on first access
    pub fn parsed(&mut self, kind: MetadataKind) -> Result<Option<&StructuredValue>> {
        match self.entries.get_mut(&kind) {
            Some(metadata) => metadata.ensure_parsed().map(Some),
            None => Ok(None),
        }
    }

    /// Every thumbnail found in EXIF, the Photoshop IRB and JFIF
    ///
    /// Blocks that fail to parse are skipped with a warning.
    pub fn thumbnails(&mut self) -> Vec<(MetadataKind, Thumbnail)> {
        let mut found = Vec::new();
        for kind in [MetadataKind::Exif, MetadataKind::PhotoshopIrb, MetadataKind::Jfif] {
            let Some(metadata) = self.entries.get_mut(&kind) else {
                continue;
            };
            match metadata.thumbnail() {
                Ok(Some(thumbnail)) => found.push((kind, thumbnail)),
                Ok(None) => {}
                Err(e) => warn!("Skipping {} thumbnail: {}", kind, e),
            }
        }
        found
    }
}

impl IntoIterator for MetadataRegistry {
    type Item = Metadata;
    type IntoIter = std::collections::btree_map::IntoValues<MetadataKind, Metadata>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iptc::IptcTag;

    #[test]
    fn test_lazy_parse() {
        let raw = iptc::to_bytes(&[IptcDataSet::text(IptcTag::ObjectName, "Title")]).unwrap();
        let mut metadata = Metadata::new(MetadataKind::Iptc, raw);
        assert!(!metadata.is_parsed());
        assert!(metadata.value().is_none());

        match metadata.ensure_parsed().unwrap() {
            StructuredValue::Iptc(sets) => assert_eq!(sets[0].data_as_string(), "Title"),
            other => panic!("unexpected value {:?}", other),
        }
        assert!(metadata.is_parsed());
    }

    #[test]
    fn test_failed_parse_stays_unparsed() {
        let mut metadata = Metadata::new(MetadataKind::PhotoshopIrb, b"not an irb".to_vec());
        assert!(metadata.ensure_parsed().is_err());
        assert!(!metadata.is_parsed());
        assert_eq!(metadata.raw(), b"not an irb");
    }

    #[test]
    fn test_comments() {
        let raw = join_comments(&["one".to_string(), "two".to_string()]);
        let mut metadata = Metadata::new(MetadataKind::Comment, raw);
        let entries = metadata.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].value, "two");
    }

    #[test]
    fn test_registry() {
        let mut registry = MetadataRegistry::new();
        registry.insert(Metadata::new(MetadataKind::Xmp, b"<x/>".to_vec()));
        registry.insert(Metadata::new(MetadataKind::Comment, b"hello".to_vec()));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(MetadataKind::Xmp));
        assert_eq!(
            registry.kinds().collect::<Vec<_>>(),
            vec![MetadataKind::Xmp, MetadataKind::Comment]
        );
        assert!(matches!(
            registry.parsed(MetadataKind::Comment).unwrap(),
            Some(StructuredValue::Comments(c)) if c == &["hello".to_string()]
        ));
        assert!(registry.parsed(MetadataKind::Exif).unwrap().is_none());
        assert!(registry.thumbnails().is_empty());
    }

    #[test]
    fn test_entry_display() {
        let entry = MetadataEntry::new("IFD0", "2 fields").with_children(vec![MetadataEntry::new("Make", "Acme")]);
        assert_eq!(entry.to_string(), "IFD0: 2 fields\n  Make: Acme\n");
    }
}
