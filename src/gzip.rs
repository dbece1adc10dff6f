//! Streaming gzip decoding with an inline Tar demuxer.
//!
//! The `.tar.gz` path never materializes the decompressed payload:
//! fixed-size chunks come out of the inflater and go straight into a
//! resumable Tar-header state machine, so memory use stays at tens of
//! kilobytes no matter how large the archive is. Data blocks are
//! discarded in bulk between headers.
//!
//! Known limitation: GNU long-name records are skipped here, not
//! reconstructed, so names past the 100-byte header field fall back to
//! the short name of the following header. The buffer-based [`tar`]
//! parser does reconstruct them; callers who need long names on
//! gzipped input must decompress first and use that parser instead.
//!
//! [`tar`]: ../tar/index.html

use std::io::Read;

use flate2::{Decompress, FlushDecompress, Status};
use log::*;

use crate::entry::{self, ArchiveEntry};
use crate::result::*;
use crate::tar;

/// Bounded chunk size for both compressed input and inflated output.
const CHUNK_SIZE: usize = 32 * 1024;

/// Longest gzip FNAME we bother to keep; anything beyond is skipped.
const MAX_NAME: usize = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

// Gzip header flag bits (RFC 1952).
const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

/// Lists the Tar entries inside a gzip-wrapped Tar stream.
pub fn parse_tar_entries<R: Read>(reader: &mut R) -> ArchiveResult<Vec<ArchiveEntry>> {
    read_header(reader)?;
    let mut chunks = InflateChunks::new(reader);
    let mut state = TarStream::new();
    while let Some(chunk) = chunks.next_chunk()? {
        state = state.step(chunk);
        if state.done {
            break;
        }
    }
    debug!(
        "streamed {} decompressed bytes into {} entries",
        state.position,
        state.entries.len()
    );
    Ok(state.entries)
}

/// Synthesizes the single-entry listing of a standalone `.gz` file.
///
/// The stream is decompressed in bounded chunks purely to count bytes.
/// The entry is named from the header's FNAME field when present, else
/// from `fallback_name`; its date comes from the header's MTIME field.
pub fn parse_standalone<R: Read>(
    reader: &mut R,
    fallback_name: &str,
) -> ArchiveResult<Vec<ArchiveEntry>> {
    let header = read_header(reader)?;
    let mut chunks = InflateChunks::new(reader);
    let mut size: u64 = 0;
    while let Some(chunk) = chunks.next_chunk()? {
        size += chunk.len() as u64;
    }

    let name = header
        .file_name
        .unwrap_or_else(|| fallback_name.to_string());
    let modified = entry::unix_datetime(header.mtime as i64);
    Ok(ArchiveEntry::new(name, false, size, modified)
        .into_iter()
        .collect())
}

/// What we keep from a gzip member header.
struct GzipHeader {
    file_name: Option<String>,
    mtime: u32,
}

/// Validates the gzip magic and skips the flag-gated header fields,
/// leaving the reader at the start of the raw DEFLATE stream.
fn read_header<R: Read>(reader: &mut R) -> ArchiveResult<GzipHeader> {
    let mut magic = [0u8; 2];
    reader.read_exact(&mut magic)?;
    if magic != GZIP_MAGIC {
        return Err(ArchiveError::NotGzip { found: magic });
    }

    // CM, FLG, MTIME(4), XFL, OS
    let mut fixed = [0u8; 8];
    reader.read_exact(&mut fixed)?;
    let flags = fixed[1];
    let mtime = u32::from_le_bytes([fixed[2], fixed[3], fixed[4], fixed[5]]);

    if flags & FEXTRA != 0 {
        let mut extra_len = [0u8; 2];
        reader.read_exact(&mut extra_len)?;
        skip_exact(reader, u16::from_le_bytes(extra_len) as u64)?;
    }
    let file_name = if flags & FNAME != 0 {
        read_null_terminated(reader)?
    } else {
        None
    };
    if flags & FCOMMENT != 0 {
        read_null_terminated(reader)?;
    }
    if flags & FHCRC != 0 {
        skip_exact(reader, 2)?;
    }

    Ok(GzipHeader { file_name, mtime })
}

fn skip_exact<R: Read>(reader: &mut R, count: u64) -> ArchiveResult<()> {
    let skipped = std::io::copy(&mut reader.take(count), &mut std::io::sink())?;
    if skipped < count {
        return Err(ArchiveError::Truncated {
            format: "gzip",
            offset: 0,
            detail: "header field overruns the stream",
        });
    }
    Ok(())
}

/// Reads a NUL-terminated Latin-1 string field, byte by byte.
/// Over-long names are consumed but not kept.
fn read_null_terminated<R: Read>(reader: &mut R) -> ArchiveResult<Option<String>> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() < MAX_NAME {
            bytes.push(byte[0]);
        }
    }
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Pull-based iterator over bounded inflated chunks.
///
/// Each call refills a fixed input buffer from the reader as needed
/// and returns one output buffer's worth of decompressed bytes.
/// End-of-input finalizes the stream rather than erroring.
struct InflateChunks<'r, R> {
    reader: &'r mut R,
    inflater: Decompress,
    in_buf: Vec<u8>,
    in_len: usize,
    out_buf: Vec<u8>,
    reader_done: bool,
    finished: bool,
}

impl<'r, R: Read> InflateChunks<'r, R> {
    fn new(reader: &'r mut R) -> Self {
        Self {
            reader,
            // Raw DEFLATE: the gzip wrapper was parsed by hand.
            inflater: Decompress::new(false),
            in_buf: vec![0u8; CHUNK_SIZE],
            in_len: 0,
            out_buf: vec![0u8; CHUNK_SIZE],
            reader_done: false,
            finished: false,
        }
    }

    /// Produces the next decompressed chunk, or `None` at stream end.
    fn next_chunk(&mut self) -> ArchiveResult<Option<&[u8]>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if self.in_len == 0 && !self.reader_done {
                self.in_len = self.reader.read(&mut self.in_buf)?;
                if self.in_len == 0 {
                    self.reader_done = true;
                }
            }
            let flush = if self.reader_done {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(&self.in_buf[..self.in_len], &mut self.out_buf, flush)
                .map_err(|e| ArchiveError::Decompression(e.to_string()))?;
            let consumed = (self.inflater.total_in() - in_before) as usize;
            let produced = (self.inflater.total_out() - out_before) as usize;

            // Keep unconsumed input for the next round.
            self.in_buf.copy_within(consumed..self.in_len, 0);
            self.in_len -= consumed;

            if status == Status::StreamEnd {
                self.finished = true;
            }
            if produced > 0 {
                return Ok(Some(&self.out_buf[..produced]));
            }
            if self.finished || (self.reader_done && consumed == 0) {
                self.finished = true;
                return Ok(None);
            }
        }
    }
}

/// Demuxer state over the logical (decompressed) Tar stream.
///
/// The position within the stream, the skip boundary, and the partial
/// header block all travel explicitly in this struct; each chunk step
/// takes the state and returns the updated one.
#[derive(Debug)]
struct TarStream {
    /// Offset in the decompressed stream of the next byte we'll see.
    position: u64,
    /// Discard bytes up to this boundary (the end of the current
    /// entry's data blocks) before accumulating the next header.
    skip_until: u64,
    /// Partial header block carried across chunk boundaries.
    pending: Vec<u8>,
    entries: Vec<ArchiveEntry>,
    done: bool,
}

impl TarStream {
    fn new() -> Self {
        Self {
            position: 0,
            skip_until: 0,
            pending: Vec::with_capacity(tar::BLOCK_SIZE),
            entries: Vec::new(),
            done: false,
        }
    }

    /// Feeds one decompressed chunk through the state machine.
    fn step(mut self, mut chunk: &[u8]) -> Self {
        while !chunk.is_empty() && !self.done {
            if self.position < self.skip_until {
                // Inside an entry's data blocks: discard in bulk.
                let discard = ((self.skip_until - self.position) as usize).min(chunk.len());
                self.position += discard as u64;
                chunk = &chunk[discard..];
                continue;
            }

            let wanted = tar::BLOCK_SIZE - self.pending.len();
            let take = wanted.min(chunk.len());
            self.pending.extend_from_slice(&chunk[..take]);
            self.position += take as u64;
            chunk = &chunk[take..];

            if self.pending.len() == tar::BLOCK_SIZE {
                self.finish_header_block();
            }
        }
        self
    }

    /// Classifies a completed header block and sets the next skip
    /// boundary, without ever buffering the data blocks themselves.
    fn finish_header_block(&mut self) {
        let verdict = tar::classify(&self.pending);
        self.pending.clear();

        self.skip_until = self.position + verdict.data_span();
        match verdict {
            tar::Block::EndOfArchive => self.done = true,
            // Long names are skipped here, not captured; see the
            // module docs for this divergence from the buffer parser.
            tar::Block::LongName { .. } => {}
            tar::Block::Metadata { .. } | tar::Block::Other { .. } => {}
            tar::Block::Entry {
                name,
                is_dir,
                size,
                modified,
            } => {
                if let Some(archive_entry) = ArchiveEntry::new(name, is_dir, size, modified) {
                    self.entries.push(archive_entry);
                }
            }
        }
    }
}
