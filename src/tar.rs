//! Tar block parsing.
//!
//! Tar has no leading signature: any sequence of valid or all-zero
//! 512-byte blocks is accepted, so this parser takes a complete buffer
//! of raw (already decompressed) data. The per-block [`classify`]
//! step is shared with the streaming gzip path, which feeds blocks in
//! as they fall out of the inflater.
//!
//! [`classify`]: fn.classify.html

use chrono::NaiveDateTime;
use log::*;

use crate::entry::{self, ArchiveEntry};

/// Tar headers and data both come in 512-byte blocks.
pub(crate) const BLOCK_SIZE: usize = 512;

// Header field offsets (POSIX ustar layout).
const NAME_OFFSET: usize = 0;
const NAME_LEN: usize = 100;
const SIZE_OFFSET: usize = 124;
const SIZE_LEN: usize = 12;
const MTIME_OFFSET: usize = 136;
const MTIME_LEN: usize = 12;
const TYPE_OFFSET: usize = 156;
const PREFIX_OFFSET: usize = 345;
const PREFIX_LEN: usize = 155;

/// What one 512-byte header block told us.
#[derive(Debug)]
pub(crate) enum Block {
    /// An all-zero block: end of the archive.
    EndOfArchive,
    /// GNU 'L' record; the next `size` data bytes hold a long name
    /// for the header that follows.
    LongName { size: u64 },
    /// PAX extended headers ('x', 'g') and GNU long links ('K'),
    /// skipped entirely along with their data blocks.
    Metadata { size: u64 },
    /// A regular file or an explicit directory.
    Entry {
        name: String,
        is_dir: bool,
        size: u64,
        modified: Option<NaiveDateTime>,
    },
    /// Any other type flag (symlink, device, ...); its data blocks
    /// are still stepped over.
    Other { size: u64 },
}

impl Block {
    /// Number of data bytes following the header, rounded up to the
    /// 512-byte block boundary.
    pub(crate) fn data_span(&self) -> u64 {
        let size = match self {
            Block::EndOfArchive => 0,
            Block::LongName { size }
            | Block::Metadata { size }
            | Block::Entry { size, .. }
            | Block::Other { size } => *size,
        };
        size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
    }
}

/// Classifies one 512-byte header block.
pub(crate) fn classify(block: &[u8]) -> Block {
    debug_assert!(block.len() >= BLOCK_SIZE);
    if block.iter().all(|&b| b == 0) {
        return Block::EndOfArchive;
    }

    let size = parse_octal(&block[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]);
    match block[TYPE_OFFSET] {
        b'L' => Block::LongName { size },
        b'x' | b'g' | b'K' => Block::Metadata { size },
        type_flag @ (b'0' | 0 | b'5') => {
            let name = full_name(block);
            let is_dir = type_flag == b'5' || name.ends_with('/');
            let mtime = parse_octal(&block[MTIME_OFFSET..MTIME_OFFSET + MTIME_LEN]);
            Block::Entry {
                name,
                is_dir,
                size,
                modified: entry::unix_datetime(mtime as i64),
            }
        }
        other => {
            trace!("skipping tar entry of type {other:#04x}");
            Block::Other { size }
        }
    }
}

/// Parses a complete buffer of raw Tar data into its entry listing.
///
/// Structural surprises end the scan early instead of failing: a
/// truncated trailing block simply stops iteration.
pub fn parse_entries(data: &[u8]) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut long_name: Option<String> = None;
    let mut pos: u64 = 0;

    while pos + BLOCK_SIZE as u64 <= data.len() as u64 {
        let header_start = pos as usize;
        let block = &data[header_start..header_start + BLOCK_SIZE];
        pos += BLOCK_SIZE as u64;

        let verdict = classify(block);
        match verdict {
            Block::EndOfArchive => break,
            Block::LongName { size } => {
                // The long name lives in the data blocks that follow.
                let available = data.len() as u64 - pos;
                let take = size.min(available) as usize;
                let raw = &data[pos as usize..pos as usize + take];
                let name = field_string(raw);
                if !name.is_empty() {
                    long_name = Some(name);
                }
            }
            Block::Metadata { .. } | Block::Other { .. } => {}
            Block::Entry {
                ref name,
                is_dir,
                size,
                modified,
            } => {
                let name = match long_name.take() {
                    Some(stashed) => stashed,
                    None => name.clone(),
                };
                if let Some(archive_entry) = ArchiveEntry::new(name, is_dir, size, modified) {
                    entries.push(archive_entry);
                }
            }
        }
        pos += verdict.data_span();
    }
    entries
}

/// Joins the USTAR prefix field with the name field.
fn full_name(block: &[u8]) -> String {
    let name = field_string(&block[NAME_OFFSET..NAME_OFFSET + NAME_LEN]);
    let prefix = field_string(&block[PREFIX_OFFSET..PREFIX_OFFSET + PREFIX_LEN]);
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// A NUL-terminated text field, decoded leniently.
fn field_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Converts a 12-byte octal ASCII field to an integer.
///
/// Leading/trailing NULs and spaces are tolerated; a malformed field
/// counts as zero.
fn parse_octal(field: &[u8]) -> u64 {
    let trimmed: &[u8] = {
        let start = field
            .iter()
            .position(|&b| b != b' ' && b != 0)
            .unwrap_or(field.len());
        let end = field[start..]
            .iter()
            .position(|&b| b == b' ' || b == 0)
            .map(|i| start + i)
            .unwrap_or(field.len());
        &field[start..end]
    };
    match std::str::from_utf8(trimmed) {
        Ok(text) => u64::from_str_radix(text, 8).unwrap_or(0),
        Err(_) => 0,
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Builds a 512-byte header block with the given name, type flag,
    /// and octal size/mtime fields.
    pub(crate) fn header_block(name: &str, type_flag: u8, size: u64, mtime: u64) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[..name.len().min(NAME_LEN)]
            .copy_from_slice(&name.as_bytes()[..name.len().min(NAME_LEN)]);
        block[SIZE_OFFSET..SIZE_OFFSET + 11].copy_from_slice(format!("{size:011o}").as_bytes());
        block[MTIME_OFFSET..MTIME_OFFSET + 11].copy_from_slice(format!("{mtime:011o}").as_bytes());
        block[TYPE_OFFSET] = type_flag;
        block
    }

    /// Pads `data` to a block boundary and appends it.
    pub(crate) fn data_blocks(archive: &mut Vec<u8>, data: &[u8]) {
        archive.extend_from_slice(data);
        let partial = data.len() % BLOCK_SIZE;
        if partial != 0 {
            archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE - partial));
        }
    }

    /// A complete archive: the given blocks plus the two-zero-block trailer.
    pub(crate) fn archive(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for block in blocks {
            out.extend_from_slice(block);
        }
        out.extend(std::iter::repeat(0u8).take(2 * BLOCK_SIZE));
        out
    }

    #[test]
    fn two_zero_blocks_parse_as_empty() {
        let buffer = vec![0u8; 2 * BLOCK_SIZE];
        assert!(parse_entries(&buffer).is_empty());
    }

    #[test]
    fn minimal_file_entry() {
        let mut blocks = vec![header_block("a.txt", b'0', 2, 0)];
        let mut with_data = Vec::new();
        data_blocks(&mut with_data, b"hi");
        blocks.push(with_data);
        let entries = parse_entries(&archive(&blocks));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "a.txt");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].size, 2);
        assert_eq!(entries[0].modified, None);
    }

    #[test]
    fn directories_by_type_and_by_slash() {
        let blocks = vec![
            header_block("dir/", b'5', 0, 0),
            header_block("odd", b'5', 0, 0),
            header_block("implied/", b'0', 0, 0),
        ];
        let entries = parse_entries(&archive(&blocks));
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.is_dir));
        // Type-5 entries without a trailing slash get one appended.
        assert_eq!(entries[1].path.as_str(), "odd/");
    }

    #[test]
    fn gnu_long_name_replaces_the_short_one() {
        let long = "d".repeat(120) + "/file.txt";
        let mut blocks = vec![header_block("............L", b'L', long.len() as u64, 0)];
        let mut name_data = Vec::new();
        data_blocks(&mut name_data, long.as_bytes());
        blocks.push(name_data);
        blocks.push(header_block(&long[..NAME_LEN], b'0', 3, 0));

        let entries = parse_entries(&archive(&blocks));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), long);
        assert_eq!(entries[0].size, 3);
    }

    #[test]
    fn pax_headers_and_links_are_skipped() {
        let mut pax_data = Vec::new();
        data_blocks(&mut pax_data, b"30 mtime=1600000000.000000000\n");
        let blocks = vec![
            header_block("pax", b'x', 30, 0),
            pax_data,
            header_block("link", b'2', 0, 0),
            header_block("kept.txt", b'0', 0, 0),
        ];
        let entries = parse_entries(&archive(&blocks));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "kept.txt");
    }

    #[test]
    fn ustar_prefix_joins_the_name() {
        let mut block = header_block("leaf.txt", b'0', 0, 0);
        block[PREFIX_OFFSET..PREFIX_OFFSET + 6].copy_from_slice(b"deeply");
        let entries = parse_entries(&archive(&[block]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "deeply/leaf.txt");
    }

    #[test]
    fn resource_fork_shadows_are_filtered() {
        let blocks = vec![
            header_block("._shadow", b'0', 0, 0),
            header_block("dir/._nested", b'0', 0, 0),
            header_block("real.txt", b'0', 0, 0),
        ];
        let entries = parse_entries(&archive(&blocks));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "real.txt");
    }

    #[test]
    fn mtime_decodes_from_octal() {
        let blocks = vec![header_block("t.txt", b'0', 0, 1_600_000_000)];
        let entries = parse_entries(&archive(&blocks));
        let modified = entries[0].modified.unwrap();
        assert_eq!(modified.and_utc().timestamp(), 1_600_000_000);
    }

    #[test]
    fn malformed_octal_counts_as_zero() {
        assert_eq!(parse_octal(b"not octal!!!"), 0);
        assert_eq!(parse_octal(b"00000000002\0"), 2);
        assert_eq!(parse_octal(&[0u8; 12]), 0);
        assert_eq!(parse_octal(b"   755 \0\0\0\0\0"), 0o755);
    }
}
