//! Thin format detection and the one-call front door.
//!
//! The hard work lives in the per-format modules; this one maps a file
//! extension or magic bytes to the parser to invoke. Plain on-disk
//! directory listing is the host's job, not ours.

use std::io::{Read, Seek};

use camino::Utf8Path;
use log::*;

use crate::arch::usize;
use crate::bzip2::{self, BzDecompressor};
use crate::entry::ArchiveEntry;
use crate::result::*;
use crate::source::ByteSource;
use crate::tree::TreeNode;
use crate::{gzip, rar, tar, tree, zip};

/// The archive container formats this crate can introspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Zip,
    Tar,
    /// A gzip-wrapped tarball, listed via the streaming path.
    TarGz,
    /// A standalone gzip member, listed as a single synthesized entry.
    Gz,
    Rar,
    /// A bzip2-compressed tarball; requires an injected decompressor.
    TarBz2,
    /// A standalone bzip2 stream; requires an injected decompressor.
    Bz2,
}

impl Format {
    /// Maps a file name to a format by extension. Compound suffixes
    /// (`.tar.gz`, `.tar.bz2`) win over their outer extension.
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        let name = path.file_name()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Some(Format::TarGz);
        }
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz") || name.ends_with(".tbz2") {
            return Some(Format::TarBz2);
        }
        match name.rsplit('.').next()? {
            "zip" => Some(Format::Zip),
            "tar" => Some(Format::Tar),
            "gz" => Some(Format::Gz),
            "rar" => Some(Format::Rar),
            "bz2" => Some(Format::Bz2),
            _ => None,
        }
    }

    /// Sniffs a format from the archive's leading bytes.
    ///
    /// Gzip magic can't distinguish `.tar.gz` from a plain `.gz`, so
    /// extension detection should be preferred when a name is
    /// available. Tar has no magic at offset 0 and is recognized last,
    /// by the ustar magic at offset 257.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK") {
            return Some(Format::Zip);
        }
        if head.starts_with(b"Rar!\x1A\x07") {
            return Some(Format::Rar);
        }
        if head.starts_with(&[0x1F, 0x8B]) {
            return Some(Format::Gz);
        }
        if head.starts_with(b"BZ") {
            return Some(Format::Bz2);
        }
        if head.len() >= 262 && &head[257..262] == b"ustar" {
            return Some(Format::Tar);
        }
        None
    }
}

/// Routes a byte source to the right parser and on to the tree
/// builder.
///
/// ```no_run
/// use std::fs::File;
/// use arcpeek::{Dispatcher, Format};
///
/// let file = File::open("backup.tar.gz")?;
/// let entries = Dispatcher::new().list_entries(Format::TarGz, file)?;
/// let forest = arcpeek::build_tree(&entries);
/// # Ok::<(), arcpeek::ArchiveError>(())
/// ```
#[derive(Default)]
pub struct Dispatcher<'a> {
    bzip2: Option<&'a dyn BzDecompressor>,
    name_hint: Option<&'a str>,
}

impl<'a> Dispatcher<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the decompressor the bzip2 formats delegate to.
    pub fn with_bzip2(mut self, decompressor: &'a dyn BzDecompressor) -> Self {
        self.bzip2 = Some(decompressor);
        self
    }

    /// Names synthesized standalone entries (usually the compressed
    /// file's own name without its final extension).
    pub fn with_name_hint(mut self, name: &'a str) -> Self {
        self.name_hint = Some(name);
        self
    }

    /// Lists the entries of `source` according to `format`.
    pub fn list_entries<R: Read + Seek>(
        &self,
        format: Format,
        mut source: R,
    ) -> ArchiveResult<Vec<ArchiveEntry>> {
        debug!("listing a {format:?} source");
        match format {
            Format::Zip => zip::parse_entries(&mut source),
            Format::Rar => rar::parse_entries(&mut source),
            Format::Tar => Ok(tar::parse_entries(&self.read_all(&mut source)?)),
            Format::TarGz => gzip::parse_tar_entries(&mut source),
            Format::Gz => gzip::parse_standalone(&mut source, self.fallback_name()),
            Format::TarBz2 => bzip2::parse_tar_entries(&self.read_all(&mut source)?, self.bzip2()?),
            Format::Bz2 => bzip2::parse_standalone(
                &self.read_all(&mut source)?,
                self.bzip2()?,
                self.fallback_name(),
            ),
        }
    }

    /// Lists `source` and organizes the entries into a sorted forest.
    pub fn build_tree<R: Read + Seek>(
        &self,
        format: Format,
        source: R,
    ) -> ArchiveResult<Vec<TreeNode>> {
        let entries = self.list_entries(format, source)?;
        Ok(tree::build_tree(&entries))
    }

    fn bzip2(&self) -> ArchiveResult<&dyn BzDecompressor> {
        self.bzip2.ok_or_else(|| {
            ArchiveError::Unsupported("bzip2 input needs an injected decompressor".to_string())
        })
    }

    fn fallback_name(&self) -> &str {
        self.name_hint.unwrap_or("data")
    }

    fn read_all<S: ByteSource>(&self, source: &mut S) -> ArchiveResult<Vec<u8>> {
        let total = source.len()?;
        source.read_at(0, usize(total)?)
    }
}
