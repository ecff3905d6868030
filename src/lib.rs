//! Streaming read, insert and remove of embedded image metadata.
//!
//! This crate edits EXIF, IPTC, XMP, ICC profiles, Photoshop image resource
//! blocks, comments and thumbnails inside JPEG and TIFF files without decoding
//! or re-encoding the image data.
//!
//! # Design Principles
//!
//! - **Streaming**: JPEG edits read only the segments before the first scan and
//!   copy the rest of the stream verbatim
//! - **Relocation, not patching**: TIFF edits rewrite the IFD tree and move the
//!   image data, so every offset in the output is consistent
//! - **Lazy parsing**: metadata blocks are kept raw until their structured
//!   value is asked for
//! - **Recoverable input**: damaged optional structures are logged and
//!   skipped rather than failing the whole read
//!
//! # Quick Start
//!
//! ```no_run
//! use meta_io::{JpegIO, MetadataKind, Xmp};
//! use std::fs::File;
//!
//! # fn main() -> meta_io::Result<()> {
//! let jpeg = JpegIO::new();
//!
//! // Read everything that is there
//! let mut metadata = jpeg.read_metadata(&mut File::open("image.jpg")?)?;
//! for kind in metadata.kinds().collect::<Vec<_>>() {
//!     println!("{}", kind);
//! }
//! if let Some(exif) = metadata.get_mut(MetadataKind::Exif) {
//!     for entry in exif.entries()? {
//!         print!("{}", entry);
//!     }
//! }
//!
//! // Replace XMP
//! let xmp = Xmp::new(b"<x:xmpmeta xmlns:x='adobe:ns:meta/'/>".to_vec());
//! jpeg.insert_xmp(
//!     &mut File::open("image.jpg")?,
//!     &mut File::create("output.jpg")?,
//!     &xmp,
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! # TIFF pages
//!
//! ```no_run
//! use meta_io::TiffIO;
//! use std::fs::File;
//!
//! # fn main() -> meta_io::Result<()> {
//! let tiff = TiffIO::new();
//! let comments = vec!["scanned".to_string()];
//! tiff.insert_comments(
//!     &mut File::open("scan.tif")?,
//!     &mut File::create("out.tif")?,
//!     0,
//!     &comments,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod appn;
mod error;
pub mod exif;
pub mod formats;
pub mod icc;
pub mod io;
pub mod iptc;
pub mod irb;
pub mod metadata;
pub mod segment;
pub mod stream;
pub mod thumbnail;
pub mod tiff;
pub mod xmp;

pub use error::{Error, Result};
pub use exif::Exif;
pub use formats::{jpeg_io::JpegIO, tiff_io::TiffIO, Container, ContainerIO};
pub use io::ByteOrder;
pub use iptc::{IptcDataSet, IptcTag};
pub use irb::{ImageResource, Irb};
pub use metadata::{Metadata, MetadataEntry, MetadataKind, MetadataRegistry, StructuredValue};
pub use segment::Segment;
pub use thumbnail::{BitmapCodec, PixelBuffer, Thumbnail, ThumbnailOptions, ThumbnailPayload};
pub use xmp::Xmp;

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
