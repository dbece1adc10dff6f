//! arcpeek lists what's inside an archive without extracting it.
//!
//! Give it a byte source identifying itself as one of several
//! container/compression formats and it enumerates the logical entries
//! (paths, sizes, directory flags, modification times), then organizes
//! them into a sorted hierarchy:
//!
//! ```no_run
//! use std::fs::File;
//! use arcpeek::{Dispatcher, Format};
//!
//! let file = File::open("backup.tar.gz")?;
//! let entries = Dispatcher::new().list_entries(Format::TarGz, file)?;
//! let forest = arcpeek::build_tree(&entries);
//! for node in &forest {
//!     println!("{} ({:?} bytes)", node.name, node.size);
//! }
//! # Ok::<(), arcpeek::ArchiveError>(())
//! ```
//!
//! No file contents are ever decompressed into memory: the Zip parser
//! reads only the central directory, the Tar and RAR parsers step over
//! data blocks, and the `.tar.gz` path streams headers out of the
//! inflater in bounded chunks. Memory use is independent of archive
//! size.
//!
//! Supported formats: Zip (including Zip64), Tar (GNU long names, PAX
//! skipping), RAR v4 and v5, gzip-wrapped Tar, and — via an injected
//! [`BzDecompressor`] — bzip2. Writing, extraction, decryption, and
//! checksum verification are all out of scope.
//!
//! [`BzDecompressor`]: bzip2/trait.BzDecompressor.html

pub mod bzip2;
pub mod dispatch;
pub mod entry;
pub mod gzip;
pub mod rar;
pub mod result;
pub mod source;
pub mod tar;
pub mod tree;
pub mod zip;

mod arch;

pub use bzip2::BzDecompressor;
pub use dispatch::{Dispatcher, Format};
pub use entry::ArchiveEntry;
pub use result::{ArchiveError, ArchiveResult};
pub use source::ByteSource;
pub use tree::{build_tree, TreeNode};
