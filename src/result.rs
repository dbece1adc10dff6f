//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The byte source doesn't carry the signature the format requires.
    #[error("Not a valid {format} archive: {detail}")]
    NotValidFormat {
        format: &'static str,
        detail: &'static str,
    },

    /// A structurally required field or region is missing or out of bounds.
    #[error("Truncated or malformed {format} archive at offset {offset}: {detail}")]
    Truncated {
        format: &'static str,
        offset: u64,
        detail: &'static str,
    },

    /// The archive uses a recognized but unimplemented sub-format.
    #[error("Unsupported archive variant: {0}")]
    Unsupported(String),

    /// The gzip magic check failed.
    #[error("Not a gzip stream: expected [1f, 8b], found {found:02x?}")]
    NotGzip { found: [u8; 2] },

    /// The bzip2 magic check failed.
    #[error("Not a bzip2 stream: expected [42, 5a], found {found:02x?}")]
    NotBzip2 { found: [u8; 2] },

    /// The (injected or built-in) decompressor reported failure.
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A cast from a 64-bit int to a usize failed while sizing a read,
    /// probably on a 32-bit system.
    #[error("Archive too large for address space")]
    InsufficientAddressSpace,
}
