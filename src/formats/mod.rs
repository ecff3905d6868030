//! Container-specific metadata I/O
//!
//! Each container format has an I/O implementation that knows how to find,
//! replace and strip metadata blocks in that file structure while copying the
//! image data through untouched.

use crate::{
    error::Result,
    exif::Exif,
    iptc::IptcDataSet,
    irb::ImageResource,
    metadata::{MetadataKind, MetadataRegistry},
    xmp::Xmp,
};
use std::io::{Read, Seek, Write};

/// Container format - defines how a file is structured on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// JPEG marker segments (JFIF/Exif)
    Jpeg,
    /// TIFF IFD chain
    Tiff,
}

/// Trait for container-specific metadata operations
///
/// Operations that write take the whole source and produce a complete new
/// stream in `writer`; the source is never modified. TIFF implementations
/// apply page-level edits to the first page.
pub trait ContainerIO {
    /// Container type this I/O implementation manages
    fn container_type() -> Container
    where
        Self: Sized;

    /// File extensions this I/O implementation accepts (e.g., ["jpg", "jpeg"])
    fn extensions() -> &'static [&'static str]
    where
        Self: Sized;

    /// MIME types this I/O implementation accepts
    fn mime_types() -> &'static [&'static str]
    where
        Self: Sized;

    /// Try to detect if this I/O implementation can parse the given header
    /// Returns Some(Container) if confident, None if unsure
    fn detect(header: &[u8]) -> Option<Container>
    where
        Self: Sized;

    /// Read every metadata block in the stream
    fn read_metadata<R: Read + Seek>(&self, source: &mut R) -> Result<MetadataRegistry>;

    /// Copy the stream without the given kinds, returning the removed blocks
    fn remove_metadata<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        kinds: &[MetadataKind],
    ) -> Result<MetadataRegistry>;

    fn insert_comments<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        comments: &[String],
    ) -> Result<()>;

    /// Write EXIF, merging with what is already there when `update` is set
    fn insert_exif<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        exif: &Exif,
        update: bool,
    ) -> Result<()>;

    fn insert_icc_profile<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        profile: &[u8],
    ) -> Result<()>;

    fn insert_iptc<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        sets: &[IptcDataSet],
        update: bool,
    ) -> Result<()>;

    fn insert_irb<R: Read + Seek, W: Write + Seek>(
        &self,
        source: &mut R,
        writer: &mut W,
        resources: &[ImageResource],
        update: bool,
    ) -> Result<()>;

    fn insert_xmp<R: Read + Seek, W: Write + Seek>(&self, source: &mut R, writer: &mut W, xmp: &Xmp) -> Result<()>;

    /// ICC profile, reassembled if the container splits it
    fn extract_icc_profile<R: Read + Seek>(&self, source: &mut R) -> Result<Option<Vec<u8>>>;
}

pub mod jpeg_io;
pub mod tiff_io;

/// Register all supported container formats in one place
///
/// Generates header detection, extension and MIME lookup on [`Container`].
macro_rules! register_containers {
    ($($variant:ident => $module:ident :: $io:ident),* $(,)?) => {
        impl Container {
            /// Detect the container from the first bytes of a stream
            pub fn detect(header: &[u8]) -> Option<Container> {
                $(
                    if let Some(container) = $module::$io::detect(header) {
                        return Some(container);
                    }
                )*
                None
            }

            /// Detect the container from the first bytes of a seekable stream,
            /// leaving it rewound
            pub fn detect_stream<R: Read + Seek>(source: &mut R) -> Result<Option<Container>> {
                use std::io::SeekFrom;

                source.seek(SeekFrom::Start(0))?;
                let mut header = [0u8; 8];
                let mut n = 0;
                while n < header.len() {
                    match source.read(&mut header[n..])? {
                        0 => break,
                        read => n += read,
                    }
                }
                source.seek(SeekFrom::Start(0))?;
                Ok(Container::detect(&header[..n]))
            }

            /// Detect container from file extension
            pub fn from_extension(ext: &str) -> Option<Container> {
                let ext_lower = ext.to_lowercase();
                $(
                    if $module::$io::extensions().contains(&ext_lower.as_str()) {
                        return Some($module::$io::container_type());
                    }
                )*
                None
            }

            /// Detect container from MIME type
            pub fn from_mime(mime: &str) -> Option<Container> {
                $(
                    if $module::$io::mime_types().iter().any(|m| m.eq_ignore_ascii_case(mime)) {
                        return Some($module::$io::container_type());
                    }
                )*
                None
            }

            /// All MIME types for this container, primary first
            pub fn mime_types(&self) -> &'static [&'static str] {
                match self {
                    $( Container::$variant => $module::$io::mime_types(), )*
                }
            }

            /// All file extensions (without dot prefix), primary first
            pub fn extensions(&self) -> &'static [&'static str] {
                match self {
                    $( Container::$variant => $module::$io::extensions(), )*
                }
            }

            pub fn to_mime(&self) -> &'static str {
                self.mime_types()[0]
            }
        }

        impl std::fmt::Display for Container {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_mime())
            }
        }
    };
}

register_containers! {
    Jpeg => jpeg_io::JpegIO,
    Tiff => tiff_io::TiffIO,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_detect() {
        assert_eq!(Container::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(Container::Jpeg));
        assert_eq!(Container::detect(b"II*\0\x08\0\0\0"), Some(Container::Tiff));
        assert_eq!(Container::detect(b"MM\0*\0\0\0\x08"), Some(Container::Tiff));
        assert_eq!(Container::detect(b"\x89PNG"), None);
        assert_eq!(Container::detect(&[]), None);
    }

    #[test]
    fn test_detect_stream_rewinds() {
        let mut source = Cursor::new(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        source.set_position(3);
        assert_eq!(Container::detect_stream(&mut source).unwrap(), Some(Container::Jpeg));
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn test_lookup() {
        assert_eq!(Container::from_extension("JPG"), Some(Container::Jpeg));
        assert_eq!(Container::from_extension("tif"), Some(Container::Tiff));
        assert_eq!(Container::from_mime("IMAGE/TIFF"), Some(Container::Tiff));
        assert_eq!(Container::from_mime("image/png"), None);
        assert_eq!(Container::Jpeg.to_string(), "image/jpeg");
    }
}
