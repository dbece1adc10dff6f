//! The random-access byte source consumed by the non-streaming parsers.
//!
//! Blanket-implemented for anything `Read + Seek`, so an in-memory
//! `io::Cursor` and a `File` both work. The streaming gzip path takes a
//! plain `io::Read` instead; see the [`gzip`] module.
//!
//! [`gzip`]: ../gzip/index.html

use std::io::{Read, Seek, SeekFrom};

use crate::result::*;

/// Random-offset reads over a finite binary blob.
pub trait ByteSource {
    /// Total length of the source in bytes.
    fn len(&mut self) -> ArchiveResult<u64>;

    /// Reads up to `length` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the source ends before
    /// `offset + length`; parsers treat a short read as truncation.
    fn read_at(&mut self, offset: u64, length: usize) -> ArchiveResult<Vec<u8>>;
}

impl<R: Read + Seek> ByteSource for R {
    fn len(&mut self) -> ArchiveResult<u64> {
        Ok(self.seek(SeekFrom::End(0))?)
    }

    fn read_at(&mut self, offset: u64, length: usize) -> ArchiveResult<Vec<u8>> {
        self.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length);
        self.take(length as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cursor_is_a_byte_source() {
        let mut source = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(source.len().unwrap(), 5);
        assert_eq!(source.read_at(1, 3).unwrap(), vec![2, 3, 4]);
        // Reads past the end come back short, not as errors.
        assert_eq!(source.read_at(4, 10).unwrap(), vec![5]);
        assert!(source.read_at(9, 4).unwrap().is_empty());
    }
}
