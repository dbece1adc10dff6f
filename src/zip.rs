//! Zip central-directory parsing.
//!
//! Only the End of central directory record and the central directory
//! itself are ever read: at most a 65,557-byte trailing window to find
//! the EOCDR, then exactly the directory's byte range. File data is
//! never touched.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use codepage_437::*;
use log::*;
use memchr::memmem;

use crate::arch::{read_u16, read_u32, read_u64, usize};
use crate::entry::{self, ArchiveEntry};
use crate::result::*;
use crate::source::ByteSource;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];

/// The EOCDR is 22 fixed bytes plus an archive comment of up to
/// 65,535 bytes, so it always sits inside the file's last 65,557 bytes.
const MAX_EOCDR_SEARCH: u64 = 22 + u16::MAX as u64;

/// Lists the entries of a Zip archive from its central directory.
///
/// Fails with [`ArchiveError::NotValidFormat`] when no EOCDR is found.
/// A directory whose declared size is zero or larger than the file
/// yields an empty listing rather than an error, and a record that
/// fails validation mid-directory stops iteration early.
pub fn parse_entries<S: ByteSource>(source: &mut S) -> ArchiveResult<Vec<ArchiveEntry>> {
    let total = source.len()?;
    let window_len = total.min(MAX_EOCDR_SEARCH);
    let window_start = total - window_len;
    let window = source.read_at(window_start, usize(window_len)?)?;

    let eocdr_posit =
        memmem::rfind(&window, &EOCDR_MAGIC).ok_or(ArchiveError::NotValidFormat {
            format: "zip",
            detail: "couldn't find End Of Central Directory Record",
        })?;
    if window.len() - eocdr_posit < EndOfCentralDirectory::size_in_file() {
        return Err(ArchiveError::Truncated {
            format: "zip",
            offset: window_start + eocdr_posit as u64,
            detail: "End Of Central Directory Record overruns the file",
        });
    }
    let eocdr = EndOfCentralDirectory::parse(&window[eocdr_posit..]);
    trace!("{eocdr:?}");

    let mut entry_count = eocdr.entries as u64;
    let mut directory_size = eocdr.central_directory_size as u64;
    let mut directory_offset = eocdr.central_directory_offset as u64;

    // 4.4.1.4 If one of the fields in the end of central directory
    // record is too small to hold required data, the field SHOULD be
    // set to -1 (0xFFFF or 0xFFFFFFFF) and the ZIP64 format record
    // SHOULD be created.
    if eocdr.entries == u16::MAX || eocdr.central_directory_offset == u32::MAX {
        // The Zip64 EOCDR locator sits immediately before the EOCDR.
        if let Some(locator_posit) =
            eocdr_posit.checked_sub(Zip64EndOfCentralDirectoryLocator::size_in_file())
        {
            if let Some(locator) =
                Zip64EndOfCentralDirectoryLocator::parse(&window[locator_posit..])
            {
                trace!("{locator:?}");
                let zip64_eocdr = source.read_at(
                    locator.zip64_eocdr_offset,
                    Zip64EndOfCentralDirectory::size_in_file(),
                )?;
                let zip64_eocdr = Zip64EndOfCentralDirectory::parse(
                    &zip64_eocdr,
                    locator.zip64_eocdr_offset,
                )?;
                trace!("{zip64_eocdr:?}");

                entry_count = zip64_eocdr.entries;
                directory_size = zip64_eocdr.central_directory_size;
                directory_offset = zip64_eocdr.central_directory_offset;
            }
        }
    }

    // A nonsense directory range means an empty listing, not an error.
    if directory_size == 0
        || directory_size > total
        || directory_offset.saturating_add(directory_size) > total
    {
        debug!(
            "central directory range {directory_offset}+{directory_size} \
             out of bounds for a {total}-byte source; listing as empty"
        );
        return Ok(Vec::new());
    }

    let directory = source.read_at(directory_offset, usize(directory_size)?)?;
    let mut remaining = &directory[..];

    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let Some(dir_entry) = CentralDirectoryEntry::parse_and_consume(&mut remaining) else {
            // Validation failure or overrun ends the walk early.
            debug!(
                "central directory ended early after {} of {entry_count} entries",
                entries.len()
            );
            break;
        };
        trace!("{dir_entry:?}");
        if let Some(archive_entry) = entry_from_directory(&dir_entry) {
            entries.push(archive_entry);
        }
    }
    Ok(entries)
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive; provides offsets for finding
/// its central directory.
#[derive(Debug)]
struct EndOfCentralDirectory {
    entries: u16,
    central_directory_size: u32,
    central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    fn parse(mut eocdr: &[u8]) -> Self {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes

        // Assert the magic instead of checking for it
        // because the search should have found it.
        assert_eq!(eocdr[..4], EOCDR_MAGIC);
        eocdr = &eocdr[4..];
        let _disk_number = read_u16(&mut eocdr);
        let _disk_with_central_directory = read_u16(&mut eocdr);
        let _entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);

        Self {
            entries,
            central_directory_size,
            central_directory_offset,
        }
    }

    fn size_in_file() -> usize {
        22
    }
}

/// Data from the Zip64 end of central directory locator
///
/// This immediately precedes the End of central directory record on
/// Zip64 files and tells us where to find the Zip64 EOCDR.
#[derive(Debug)]
struct Zip64EndOfCentralDirectoryLocator {
    zip64_eocdr_offset: u64,
}

impl Zip64EndOfCentralDirectoryLocator {
    fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::size_in_file() || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let _disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let _disks = read_u32(&mut mapping);

        Some(Self { zip64_eocdr_offset })
    }

    fn size_in_file() -> usize {
        20
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
struct Zip64EndOfCentralDirectory {
    entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    fn parse(mut eocdr: &[u8], posit: u64) -> ArchiveResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if eocdr.len() < Self::size_in_file() || eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ArchiveError::Truncated {
                format: "zip",
                offset: posit,
                detail: "Zip64 End Of Central Directory Record missing at located offset",
            });
        }
        eocdr = &eocdr[4..];
        let _eocdr_size = read_u64(&mut eocdr);
        let _source_version = read_u16(&mut eocdr);
        let _minimum_extract_version = read_u16(&mut eocdr);
        let _disk_number = read_u32(&mut eocdr);
        let _disk_with_central_directory = read_u32(&mut eocdr);
        let _entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        Ok(Self {
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    fn size_in_file() -> usize {
        56
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
struct CentralDirectoryEntry<'a> {
    flags: u16,
    last_modified_time: u16,
    last_modified_date: u16,
    uncompressed_size: u32,
    path: &'a [u8],
    extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    /// Parses a 46-byte central directory file header plus its
    /// variable-length fields, advancing `entry` past it.
    ///
    /// Returns `None` (ending the directory walk) when the signature
    /// doesn't match or the record overruns the buffer.
    fn parse_and_consume(entry: &mut &'a [u8]) -> Option<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if entry.len() < 46 || entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return None;
        }
        *entry = &entry[4..];
        let _source_version = read_u16(entry);
        let _minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let _compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        // Read positionally, never verified (checksums are a non-goal).
        let _crc32 = read_u32(entry);
        let _compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let path_length = read_u16(entry) as usize;
        let extra_field_length = read_u16(entry) as usize;
        let file_comment_length = read_u16(entry) as usize;
        let _disk_number = read_u16(entry);
        let _internal_file_attributes = read_u16(entry);
        let _external_file_attributes = read_u32(entry);
        let _header_offset = read_u32(entry);

        if entry.len() < path_length + extra_field_length + file_comment_length {
            return None;
        }
        let (path, remaining) = entry.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (_file_comment, remaining) = remaining.split_at(file_comment_length);
        *entry = remaining;

        Some(Self {
            flags,
            last_modified_time,
            last_modified_date,
            uncompressed_size,
            path,
            extra_field,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Converts a central directory record to an [`ArchiveEntry`],
/// or `None` when the entry is filtered or its name is unusable.
fn entry_from_directory(cde: &CentralDirectoryEntry) -> Option<ArchiveEntry> {
    let path: Cow<str> = if is_utf8(cde.flags) {
        // A bad name skips this entry, not the whole parse.
        Cow::Borrowed(std::str::from_utf8(cde.path).ok()?)
    } else {
        Cow::borrow_from_cp437(cde.path, &CP437_CONTROL)
    };

    let mut size = cde.uncompressed_size as u64;
    if cde.uncompressed_size == u32::MAX {
        if let Some(wide) = zip64_size_from_extra_field(cde.extra_field) {
            size = wide;
        }
    }

    let is_dir = path.ends_with('/');
    let modified = entry::dos_datetime(cde.last_modified_time, cde.last_modified_date);
    ArchiveEntry::new(path.into_owned(), is_dir, size, modified)
}

/// Scans an entry's extra-field list for the Zip64 extended-information
/// tag and returns its 64-bit uncompressed size.
fn zip64_size_from_extra_field(mut extra_field: &[u8]) -> Option<u64> {
    // 4.5.1 ... the following structure MUST be used for all programs
    // storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = read_u16(&mut extra_field) as usize;
        if extra_field.len() < field_len {
            return None;
        }
        // Zip64 extended information extra field:
        // the original (uncompressed) size comes first.
        if kind == 0x0001 && field_len >= 8 {
            let mut field = &extra_field[..8];
            return Some(read_u64(&mut field));
        }
        extra_field = &extra_field[field_len..];
    }
    None
}
