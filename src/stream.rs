//! Stream wrappers used by the segment engines

use std::io::{IoSlice, Read, Result, Write};

/// A reader that remembers how many bytes it has handed out
///
/// The JPEG scanner reads through this so malformed segments can be reported
/// with their stream offset. Nothing is buffered: the wrapped reader is left
/// positioned exactly after the last byte consumed.
pub struct PositionReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> PositionReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PositionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// A writer wrapper that passes every chunk to a callback before forwarding it
///
/// # Example
///
/// ```rust
/// use std::io::Write;
/// use meta_io::stream::ProcessingWriter;
///
/// let mut output = Vec::new();
/// let mut written = 0;
/// let mut writer = ProcessingWriter::new(&mut output, |data| written += data.len());
/// writer.write_all(b"hello")?;
/// drop(writer);
/// assert_eq!(written, 5);
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct ProcessingWriter<W: Write, F: FnMut(&[u8])> {
    writer: W,
    processor: F,
}

impl<W: Write, F: FnMut(&[u8])> ProcessingWriter<W, F> {
    pub fn new(writer: W, processor: F) -> Self {
        Self { writer, processor }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write, F: FnMut(&[u8])> Write for ProcessingWriter<W, F> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // Only the part the inner writer accepted counts as written
        let n = self.writer.write(buf)?;
        (self.processor)(&buf[..n]);
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        (self.processor)(buf);
        Ok(())
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        let mut remaining = self.writer.write_vectored(bufs)?;
        let written = remaining;
        for buf in bufs {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(buf.len());
            (self.processor)(&buf[..take]);
            remaining -= take;
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_position_reader() {
        let mut reader = PositionReader::new(Cursor::new(vec![1u8, 2, 3, 4]));
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.position(), 3);
        assert_eq!(reader.into_inner().position(), 3);
    }

    #[test]
    fn test_processing_writer_sees_all_data() {
        let mut output = Vec::new();
        let mut seen = Vec::new();
        {
            let mut writer = ProcessingWriter::new(&mut output, |data| seen.extend_from_slice(data));
            writer.write_all(b"hello ").unwrap();
            writer.write_all(b"world").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(output, b"hello world");
        assert_eq!(seen, b"hello world");
    }
}
