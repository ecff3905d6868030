//! Error types for meta-io

use std::io;

/// Result type for meta-io operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or rewriting image metadata
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Stream ended inside a segment, scan or field value
    #[error("Premature end of stream: {0}")]
    Truncated(String),

    /// Invalid file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid segment
    #[error("Invalid segment at offset {offset}: {reason}")]
    InvalidSegment { offset: u64, reason: String },

    /// A structure-critical tag would silently change value
    #[error("Refusing to override critical tag {tag} (0x{code:04X}) with a different value")]
    CriticalTagConflict { tag: &'static str, code: u16 },

    /// Requested page is not in the IFD chain
    #[error("Page {page} out of range ({pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    /// Page range with start after end
    #[error("Invalid page range {start}..={end}")]
    InvalidRange { start: usize, end: usize },

    /// Data size exceeds maximum allowed
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    /// XMP packet could not be tokenised
    #[error("XMP error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Failure reported by the host bitmap codec
    #[error("Bitmap codec error: {0}")]
    Codec(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated(err.to_string())
        } else {
            Error::Io(err)
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::InvalidFormat(format!("XMP attribute error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_truncated() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, Error::Truncated(_)));

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
