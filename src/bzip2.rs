//! Bzip2 integration.
//!
//! The bzip2 algorithm itself lives outside this crate: callers inject
//! a [`BzDecompressor`] capability. We validate the magic, delegate
//! whole-buffer decompression, and either re-parse the result as Tar
//! (`.tar.bz2`) or synthesize a single-file entry (standalone `.bz2`).

use crate::entry::ArchiveEntry;
use crate::result::*;
use crate::tar;

const BZIP2_MAGIC: [u8; 2] = [b'B', b'Z'];

/// Whole-buffer bzip2 decompression, injected by the caller.
pub trait BzDecompressor {
    /// Decompresses a complete bzip2 stream.
    fn decompress(
        &self,
        data: &[u8],
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

fn check_magic(data: &[u8]) -> ArchiveResult<()> {
    if data.len() < 2 || data[..2] != BZIP2_MAGIC {
        let found = [
            data.first().copied().unwrap_or(0),
            data.get(1).copied().unwrap_or(0),
        ];
        return Err(ArchiveError::NotBzip2 { found });
    }
    Ok(())
}

/// Lists the Tar entries inside a bzip2-compressed tarball.
pub fn parse_tar_entries<D: BzDecompressor + ?Sized>(
    data: &[u8],
    decompressor: &D,
) -> ArchiveResult<Vec<ArchiveEntry>> {
    check_magic(data)?;
    let decompressed = decompressor
        .decompress(data)
        .map_err(|e| ArchiveError::Decompression(e.to_string()))?;
    Ok(tar::parse_entries(&decompressed))
}

/// Synthesizes the single-entry listing of a standalone `.bz2` file.
///
/// Bzip2 encodes neither a name nor a date, so the entry is named from
/// `fallback_name` and carries no modification time; its size is the
/// decompressed byte count.
pub fn parse_standalone<D: BzDecompressor + ?Sized>(
    data: &[u8],
    decompressor: &D,
    fallback_name: &str,
) -> ArchiveResult<Vec<ArchiveEntry>> {
    check_magic(data)?;
    let decompressed = decompressor
        .decompress(data)
        .map_err(|e| ArchiveError::Decompression(e.to_string()))?;
    Ok(
        ArchiveEntry::new(fallback_name, false, decompressed.len() as u64, None)
            .into_iter()
            .collect(),
    )
}
