//! RAR block parsing for the two incompatible on-disk layouts.
//!
//! A 7-byte signature selects the v4 walk (fixed little-endian header
//! offsets); an 8-byte signature selects the v5 walk (self-describing
//! headers addressed by base-128 variable-length integers). Nothing is
//! decompressed: file blocks are stepped over by their packed size.
//!
//! Service headers (recovery records, v5 encryption headers, ...) are
//! treated as opaque skippable blocks. An archive using v5 header
//! encryption therefore lists as empty rather than erroring.

use log::*;

use crate::arch::usize;
use crate::entry::{self, ArchiveEntry};
use crate::result::*;
use crate::source::ByteSource;

const RAR4_SIGNATURE: [u8; 7] = [b'R', b'a', b'r', b'!', 0x1A, 0x07, 0x00];
const RAR5_SIGNATURE: [u8; 8] = [b'R', b'a', b'r', b'!', 0x1A, 0x07, 0x01, 0x00];

// v4 block types
const RAR4_FILE_HEADER: u8 = 0x74;
const RAR4_ARCHIVE_END: u8 = 0x7B;

// v4 header flags
const RAR4_FLAG_LARGE_SIZES: u16 = 0x0100;
const RAR4_FLAG_ADD_SIZE: u16 = 0x8000;
/// All three of these set means a directory in pre-2.0 archives.
const RAR4_FLAG_DIRECTORY: u16 = 0x00E0;

// v5 header types
const RAR5_FILE_HEADER: u64 = 2;
const RAR5_ARCHIVE_END: u64 = 5;

/// Lists the entries of a RAR archive, dispatching on its signature.
pub fn parse_entries<S: ByteSource>(source: &mut S) -> ArchiveResult<Vec<ArchiveEntry>> {
    let head = source.read_at(0, RAR5_SIGNATURE.len())?;
    if head.len() >= RAR5_SIGNATURE.len() && head[..8] == RAR5_SIGNATURE {
        parse_v5(source)
    } else if head.len() >= RAR4_SIGNATURE.len() && head[..7] == RAR4_SIGNATURE {
        parse_v4(source)
    } else {
        Err(ArchiveError::NotValidFormat {
            format: "rar",
            detail: "missing RAR signature",
        })
    }
}

// ---------------------------------------------------------------------------
// v4: fixed 7-byte common block headers
// ---------------------------------------------------------------------------

fn parse_v4<S: ByteSource>(source: &mut S) -> ArchiveResult<Vec<ArchiveEntry>> {
    let total = source.len()?;
    let mut entries = Vec::new();
    let mut pos = RAR4_SIGNATURE.len() as u64;

    // Common block header:
    // HEAD_CRC(2) HEAD_TYPE(1) HEAD_FLAGS(2) HEAD_SIZE(2)
    while pos + 7 <= total {
        let head = source.read_at(pos, 7)?;
        if head.len() < 7 {
            break;
        }
        let block_type = head[2];
        let flags = u16::from_le_bytes([head[3], head[4]]);
        let header_size = u16::from_le_bytes([head[5], head[6]]) as u64;
        trace!("rar4 block {block_type:#04x} flags {flags:#06x} size {header_size} at {pos}");

        if block_type == RAR4_ARCHIVE_END {
            break;
        }
        if header_size < 7 {
            // A header can't be smaller than its own fixed prefix.
            break;
        }

        if block_type == RAR4_FILE_HEADER {
            if header_size < 32 {
                break;
            }
            let header = source.read_at(pos, usize(header_size)?)?;
            if (header.len() as u64) < header_size {
                break;
            }
            let (archive_entry, packed_size) = v4_file_block(&header, flags);
            if let Some(archive_entry) = archive_entry {
                entries.push(archive_entry);
            }
            // File blocks are followed by their packed (stored) data.
            pos += header_size + packed_size;
        } else {
            let mut skip = header_size;
            if flags & RAR4_FLAG_ADD_SIZE != 0 {
                // Non-file blocks may carry trailing data of their own.
                let add = source.read_at(pos + 7, 4)?;
                if add.len() < 4 {
                    break;
                }
                skip += u32::from_le_bytes([add[0], add[1], add[2], add[3]]) as u64;
            }
            pos += skip;
        }
    }
    Ok(entries)
}

/// Decodes a v4 file header block.
///
/// Returns the entry (or `None` when it's filtered or malformed) and
/// the packed size to step over. Layout, from the block start:
///
///   +0  HEAD_CRC      2   +16 FILE_CRC  4
///   +2  HEAD_TYPE     1   +20 FTIME     4  (DOS date<<16 | time)
///   +3  HEAD_FLAGS    2   +24 UNP_VER   1
///   +5  HEAD_SIZE     2   +25 METHOD    1
///   +7  PACK_SIZE     4   +26 NAME_SIZE 2
///   +11 UNP_SIZE      4   +28 ATTR      4
///   +15 HOST_OS       1   +32 name (or high size words first)
fn v4_file_block(header: &[u8], flags: u16) -> (Option<ArchiveEntry>, u64) {
    let mut packed_size = u32_at(header, 7) as u64;
    let mut unpacked_size = u32_at(header, 11) as u64;
    let dos_stamp = u32_at(header, 20);
    let name_length = u16_at(header, 26) as usize;
    let attributes = u32_at(header, 28);

    let mut name_offset = 32;
    if flags & RAR4_FLAG_LARGE_SIZES != 0 {
        if header.len() < 40 {
            return (None, packed_size);
        }
        // High-order words for 64-bit sizes.
        unpacked_size |= (u32_at(header, 36) as u64) << 32;
        packed_size |= (u32_at(header, header.len() - 8) as u64) << 32;
        name_offset = 40;
    }

    if header.len() < name_offset + name_length {
        return (None, packed_size);
    }
    let raw_name = &header[name_offset..name_offset + name_length];
    // UTF-8 with an ASCII fallback.
    let name = String::from_utf8_lossy(raw_name).replace('\\', "/");

    let is_dir = attributes & 0x10 != 0
        || flags & RAR4_FLAG_DIRECTORY == RAR4_FLAG_DIRECTORY
        || name.ends_with('/');
    let modified = entry::dos_datetime_packed(dos_stamp);

    (
        ArchiveEntry::new(name, is_dir, unpacked_size, modified),
        packed_size,
    )
}

// ---------------------------------------------------------------------------
// v5: variable-length-integer headers
// ---------------------------------------------------------------------------

/// Decodes a RAR5 vint: little-endian base 128, where each byte
/// contributes its low 7 bits and the high bit continues the number.
/// Decoding stops at the first byte without the continuation bit, or
/// after 10 bytes (enough for 64 bits), whichever comes first.
///
/// Returns the value and the number of bytes consumed, or `None` if
/// the slice runs out mid-number.
pub(crate) fn read_vint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().take(10).enumerate() {
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    if data.len() >= 10 {
        Some((value, 10))
    } else {
        None
    }
}

/// Cursor over a v5 header body.
struct VintReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VintReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn vint(&mut self) -> Option<u64> {
        let (value, consumed) = read_vint(&self.data[self.pos..])?;
        self.pos += consumed;
        Some(value)
    }

    fn u32_le(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + count)?;
        self.pos += count;
        Some(bytes)
    }
}

fn parse_v5<S: ByteSource>(source: &mut S) -> ArchiveResult<Vec<ArchiveEntry>> {
    let total = source.len()?;
    let mut entries = Vec::new();
    let mut pos = RAR5_SIGNATURE.len() as u64;

    loop {
        // Block prefix: CRC32(4), then a vint header size. Read enough
        // for the longest possible vint.
        let prefix = source.read_at(pos, 4 + 10)?;
        if prefix.len() < 5 {
            break;
        }
        let Some((header_size, vint_len)) = read_vint(&prefix[4..]) else {
            break;
        };
        let header_start = pos + 4 + vint_len as u64;
        if header_size == 0 || header_start + header_size > total {
            break;
        }
        let header = source.read_at(header_start, usize(header_size)?)?;
        if (header.len() as u64) < header_size {
            break;
        }

        let mut reader = VintReader::new(&header);
        let Some(header_type) = reader.vint() else {
            break;
        };
        let Some(header_flags) = reader.vint() else {
            break;
        };
        // 0x0001: extra area present; 0x0002: data area present.
        let _extra_size = if header_flags & 0x0001 != 0 {
            match reader.vint() {
                Some(size) => size,
                None => break,
            }
        } else {
            0
        };
        let data_size = if header_flags & 0x0002 != 0 {
            match reader.vint() {
                Some(size) => size,
                None => break,
            }
        } else {
            0
        };
        trace!("rar5 header type {header_type} flags {header_flags:#x} data {data_size} at {pos}");

        if header_type == RAR5_ARCHIVE_END {
            break;
        }
        if header_type == RAR5_FILE_HEADER {
            // A malformed body skips this entry; the declared sizes
            // still let us advance.
            if let Some(archive_entry) = v5_file_body(&mut reader) {
                entries.push(archive_entry);
            }
        }

        pos = header_start + header_size + data_size;
    }
    Ok(entries)
}

/// Decodes a v5 file-header body, positioned just past the data-size
/// field. In order: file flags, unpacked size, attributes, conditional
/// mtime, conditional CRC32, compression info, host OS, name length,
/// then exactly that many raw UTF-8 name bytes.
fn v5_file_body(reader: &mut VintReader) -> Option<ArchiveEntry> {
    let file_flags = reader.vint()?;
    let unpacked_size = reader.vint()?;
    let _attributes = reader.vint()?;
    let modified = if file_flags & 0x0002 != 0 {
        entry::unix_datetime(reader.u32_le()? as i64)
    } else {
        None
    };
    if file_flags & 0x0004 != 0 {
        // CRC32, read positionally and discarded.
        reader.u32_le()?;
    }
    let _compression_info = reader.vint()?;
    let _host_os = reader.vint()?;
    let name_length = reader.vint()?;
    let raw_name = reader.bytes(usize(name_length).ok()?)?;

    let name = std::str::from_utf8(raw_name).ok()?.replace('\\', "/");
    let is_dir = file_flags & 0x0001 != 0;
    ArchiveEntry::new(name, is_dir, unpacked_size, modified)
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn vint_round_trips() {
        assert_eq!(read_vint(&[0x00]), Some((0, 1)));
        assert_eq!(read_vint(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(read_vint(&[0x7F]), Some((127, 1)));
        assert_eq!(read_vint(&[0xFF, 0x7F]), Some((16383, 2)));
        // Continuation bit with nothing after it: not decodable.
        assert_eq!(read_vint(&[0x80]), None);
        assert_eq!(read_vint(&[]), None);
    }

    #[test]
    fn vint_stops_after_ten_bytes() {
        let all_continuations = [0xFFu8; 12];
        let (_, consumed) = read_vint(&all_continuations).unwrap();
        assert_eq!(consumed, 10);
    }

    pub(crate) fn encode_vint(mut value: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        loop {
            let low = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                bytes.push(low);
                return bytes;
            }
            bytes.push(low | 0x80);
        }
    }

    /// A v4 file block: fixed 32-byte header, name, then packed data.
    pub(crate) fn rar4_file_block(
        name: &str,
        packed: &[u8],
        unpacked_size: u32,
        attributes: u32,
        dos_stamp: u32,
    ) -> Vec<u8> {
        let header_size = (32 + name.len()) as u16;
        let mut block = Vec::new();
        block.extend_from_slice(&0u16.to_le_bytes()); // HEAD_CRC
        block.push(RAR4_FILE_HEADER);
        block.extend_from_slice(&0u16.to_le_bytes()); // HEAD_FLAGS
        block.extend_from_slice(&header_size.to_le_bytes());
        block.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        block.extend_from_slice(&unpacked_size.to_le_bytes());
        block.push(0); // HOST_OS
        block.extend_from_slice(&0u32.to_le_bytes()); // FILE_CRC
        block.extend_from_slice(&dos_stamp.to_le_bytes());
        block.push(29); // UNP_VER
        block.push(0x30); // METHOD: store
        block.extend_from_slice(&(name.len() as u16).to_le_bytes());
        block.extend_from_slice(&attributes.to_le_bytes());
        block.extend_from_slice(name.as_bytes());
        block.extend_from_slice(packed);
        block
    }

    pub(crate) fn rar4_end_block() -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(&0u16.to_le_bytes());
        block.push(RAR4_ARCHIVE_END);
        block.extend_from_slice(&0u16.to_le_bytes());
        block.extend_from_slice(&7u16.to_le_bytes());
        block
    }

    pub(crate) fn rar4_archive(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut archive = RAR4_SIGNATURE.to_vec();
        for block in blocks {
            archive.extend_from_slice(block);
        }
        archive.extend_from_slice(&rar4_end_block());
        archive
    }

    /// A v5 block: CRC32 prefix, vint header size, then the body.
    fn rar5_block(body: &[u8]) -> Vec<u8> {
        let mut block = vec![0u8; 4]; // CRC32, unchecked
        block.extend_from_slice(&encode_vint(body.len() as u64));
        block.extend_from_slice(body);
        block
    }

    pub(crate) fn rar5_file_block(
        name: &str,
        data: &[u8],
        unpacked_size: u64,
        is_dir: bool,
        mtime: Option<u32>,
    ) -> Vec<u8> {
        let mut file_flags: u64 = 0;
        if is_dir {
            file_flags |= 0x0001;
        }
        if mtime.is_some() {
            file_flags |= 0x0002;
        }

        let mut body = Vec::new();
        body.extend_from_slice(&encode_vint(RAR5_FILE_HEADER));
        // Header flags: data area present when there's packed data.
        let header_flags: u64 = if data.is_empty() { 0 } else { 0x0002 };
        body.extend_from_slice(&encode_vint(header_flags));
        if !data.is_empty() {
            body.extend_from_slice(&encode_vint(data.len() as u64));
        }
        body.extend_from_slice(&encode_vint(file_flags));
        body.extend_from_slice(&encode_vint(unpacked_size));
        body.extend_from_slice(&encode_vint(0)); // attributes
        if let Some(mtime) = mtime {
            body.extend_from_slice(&mtime.to_le_bytes());
        }
        body.extend_from_slice(&encode_vint(0)); // compression info
        body.extend_from_slice(&encode_vint(0)); // host OS
        body.extend_from_slice(&encode_vint(name.len() as u64));
        body.extend_from_slice(name.as_bytes());

        let mut block = rar5_block(&body);
        block.extend_from_slice(data);
        block
    }

    pub(crate) fn rar5_end_block() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&encode_vint(RAR5_ARCHIVE_END));
        body.extend_from_slice(&encode_vint(0));
        rar5_block(&body)
    }

    pub(crate) fn rar5_archive(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut archive = RAR5_SIGNATURE.to_vec();
        for block in blocks {
            archive.extend_from_slice(block);
        }
        archive.extend_from_slice(&rar5_end_block());
        archive
    }

    #[test]
    fn bad_signature_is_not_a_rar() {
        let result = parse_entries(&mut Cursor::new(b"Rat!\x1a\x07\x00".to_vec()));
        assert!(matches!(
            result,
            Err(ArchiveError::NotValidFormat { format: "rar", .. })
        ));
    }

    #[test]
    fn v4_walk_lists_files_and_skips_data() {
        // 1980-01-01 00:00:00 in packed DOS form: date in the high word.
        let dos_stamp = (((1 << 5) | 1) as u32) << 16;
        let blocks = vec![
            rar4_file_block("docs\\readme.txt", b"packed bytes here", 42, 0, dos_stamp),
            rar4_file_block("docs", b"", 0, 0x10, 0),
        ];
        let entries = parse_entries(&mut Cursor::new(rar4_archive(&blocks))).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path.as_str(), "docs/readme.txt");
        assert_eq!(entries[0].size, 42);
        assert!(entries[0].modified.is_some());
        // DOS directory attribute, with the separator appended.
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].path.as_str(), "docs/");
        assert_eq!(entries[1].size, 0);
    }

    #[test]
    fn v5_walk_lists_files_and_skips_data() {
        let blocks = vec![
            rar5_file_block("a/b.txt", b"stored", 6, false, Some(1_600_000_000)),
            rar5_file_block("a", &[], 0, true, None),
        ];
        let entries = parse_entries(&mut Cursor::new(rar5_archive(&blocks))).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path.as_str(), "a/b.txt");
        assert_eq!(entries[0].size, 6);
        assert_eq!(
            entries[0].modified.unwrap().and_utc().timestamp(),
            1_600_000_000
        );
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].path.as_str(), "a/");
    }

    #[test]
    fn v5_unknown_headers_are_opaque() {
        // A service header (type 3) with a data area.
        let mut body = Vec::new();
        body.extend_from_slice(&encode_vint(3));
        body.extend_from_slice(&encode_vint(0x0002));
        body.extend_from_slice(&encode_vint(16));
        let mut service = rar5_block(&body);
        service.extend_from_slice(&[0xAA; 16]);

        let blocks = vec![service, rar5_file_block("kept.txt", &[], 1, false, None)];
        let entries = parse_entries(&mut Cursor::new(rar5_archive(&blocks))).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "kept.txt");
    }
}
